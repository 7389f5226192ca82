use crate::application::dto::*;
use crate::domain::errors::DomainError;
use crate::domain::value_objects::Tag;
use crate::infra::openfga::{wire, RelationStore, RelationTuple, TupleFilter};
use crate::permissions::Authorizer;

fn parse_tuple(dto: &RelationDto) -> Result<RelationTuple, DomainError> {
    if dto.relation.is_empty()
        || !dto
            .relation
            .chars()
            .all(|c| c.is_ascii_lowercase() || c == '_')
    {
        return Err(DomainError::BadRequest(format!(
            "{:?} is not a valid relation",
            dto.relation
        )));
    }
    Ok(RelationTuple {
        object: Tag::parse(&dto.object)?,
        relation: dto.relation.clone(),
        target: Tag::parse(&dto.target_object)?,
    })
}

fn tuple_to_dto(tuple: &RelationTuple) -> RelationDto {
    RelationDto {
        object: tuple.object.to_string(),
        relation: tuple.relation.clone(),
        target_object: tuple.target.to_string(),
    }
}

pub struct AddRelationUseCase<'a> {
    relations: &'a dyn RelationStore,
    authorizer: &'a Authorizer,
}

impl<'a> AddRelationUseCase<'a> {
    pub fn new(relations: &'a dyn RelationStore, authorizer: &'a Authorizer) -> Self {
        AddRelationUseCase {
            relations,
            authorizer,
        }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        tuples: &[RelationDto],
    ) -> Result<(), DomainError> {
        self.authorizer.require_admin(caller).await?;
        let parsed = tuples
            .iter()
            .map(parse_tuple)
            .collect::<Result<Vec<_>, _>>()?;
        self.relations.add_relation(&parsed).await
    }
}

pub struct RemoveRelationUseCase<'a> {
    relations: &'a dyn RelationStore,
    authorizer: &'a Authorizer,
}

impl<'a> RemoveRelationUseCase<'a> {
    pub fn new(relations: &'a dyn RelationStore, authorizer: &'a Authorizer) -> Self {
        RemoveRelationUseCase {
            relations,
            authorizer,
        }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        tuples: &[RelationDto],
    ) -> Result<(), DomainError> {
        self.authorizer.require_admin(caller).await?;
        let parsed = tuples
            .iter()
            .map(parse_tuple)
            .collect::<Result<Vec<_>, _>>()?;
        self.relations.remove_relation(&parsed).await
    }
}

pub struct CheckRelationUseCase<'a> {
    relations: &'a dyn RelationStore,
    authorizer: &'a Authorizer,
}

impl<'a> CheckRelationUseCase<'a> {
    pub fn new(relations: &'a dyn RelationStore, authorizer: &'a Authorizer) -> Self {
        CheckRelationUseCase {
            relations,
            authorizer,
        }
    }

    /// Admins may check any tuple; other callers only tuples about
    /// themselves.
    pub async fn execute(
        &self,
        caller: &Tag,
        dto: &RelationDto,
    ) -> Result<bool, DomainError> {
        let tuple = parse_tuple(dto)?;
        if tuple.object != *caller {
            self.authorizer.require_admin(caller).await?;
        }
        self.relations.check_relation(&tuple, &[]).await
    }
}

pub struct ListRelationshipTuplesUseCase<'a> {
    relations: &'a dyn RelationStore,
    authorizer: &'a Authorizer,
}

impl<'a> ListRelationshipTuplesUseCase<'a> {
    pub fn new(relations: &'a dyn RelationStore, authorizer: &'a Authorizer) -> Self {
        ListRelationshipTuplesUseCase {
            relations,
            authorizer,
        }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        request: &ListRelationshipTuplesRequest,
    ) -> Result<(Vec<RelationDto>, String), DomainError> {
        self.authorizer.require_admin(caller).await?;
        let mut filter = TupleFilter::default();
        if let Some(partial) = &request.tuple {
            filter.object = partial
                .object
                .as_deref()
                .map(|raw| Tag::parse(raw).map(|tag| wire(&tag)))
                .transpose()?;
            filter.relation = partial.relation.clone();
            filter.target = partial
                .target_object
                .as_deref()
                .map(|raw| Tag::parse(raw).map(|tag| wire(&tag)))
                .transpose()?;
        }
        let page_size = request.page_size.unwrap_or(50).clamp(1, 100);
        let token = request.continuation_token.clone().unwrap_or_default();
        let (tuples, next) = self
            .relations
            .list_relationship_tuples(&filter, page_size, &token)
            .await?;
        Ok((tuples.iter().map(tuple_to_dto).collect(), next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_parse_tuple_round_trip() {
        let group = Uuid::new_v4();
        let model = Uuid::new_v4();
        let dto = RelationDto {
            object: format!("group-{}#member", group),
            relation: "writer".to_string(),
            target_object: format!("model-{}", model),
        };
        let tuple = parse_tuple(&dto).unwrap();
        assert_eq!(tuple.object.relation.as_deref(), Some("member"));
        let back = tuple_to_dto(&tuple);
        assert_eq!(back.object, dto.object);
        assert_eq!(back.target_object, dto.target_object);
    }

    #[test]
    fn test_invalid_relation_rejected() {
        let dto = RelationDto {
            object: "user-bob@x.com".to_string(),
            relation: "Not A Relation".to_string(),
            target_object: "cloud-aws".to_string(),
        };
        assert!(matches!(
            parse_tuple(&dto),
            Err(DomainError::BadRequest(_))
        ));
    }
}
