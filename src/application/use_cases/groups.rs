use crate::application::dto::*;
use crate::domain::errors::DomainError;
use crate::domain::repositories::GroupRepository;
use crate::domain::value_objects::{validate_group_name, Tag};
use crate::infra::openfga::{wire, RelationStore, TupleFilter};
use crate::permissions::Authorizer;

pub struct AddGroupUseCase<'a> {
    groups: &'a dyn GroupRepository,
    authorizer: &'a Authorizer,
}

impl<'a> AddGroupUseCase<'a> {
    pub fn new(groups: &'a dyn GroupRepository, authorizer: &'a Authorizer) -> Self {
        AddGroupUseCase { groups, authorizer }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        request: AddGroupRequest,
    ) -> Result<GroupInfo, DomainError> {
        self.authorizer.require_admin(caller).await?;
        validate_group_name(&request.name)?;
        let group = self.groups.add(&request.name).await?;
        Ok(GroupInfo::from(&group))
    }
}

pub struct RenameGroupUseCase<'a> {
    groups: &'a dyn GroupRepository,
    authorizer: &'a Authorizer,
}

impl<'a> RenameGroupUseCase<'a> {
    pub fn new(groups: &'a dyn GroupRepository, authorizer: &'a Authorizer) -> Self {
        RenameGroupUseCase { groups, authorizer }
    }

    /// The UUID is stable across renames, so tuples referencing the group
    /// stay valid without rewrites.
    pub async fn execute(
        &self,
        caller: &Tag,
        request: RenameGroupRequest,
    ) -> Result<GroupInfo, DomainError> {
        self.authorizer.require_admin(caller).await?;
        validate_group_name(&request.new_name)?;
        let group = self.groups.rename(&request.name, &request.new_name).await?;
        Ok(GroupInfo::from(&group))
    }
}

pub struct RemoveGroupUseCase<'a> {
    groups: &'a dyn GroupRepository,
    relations: &'a dyn RelationStore,
    authorizer: &'a Authorizer,
}

impl<'a> RemoveGroupUseCase<'a> {
    pub fn new(
        groups: &'a dyn GroupRepository,
        relations: &'a dyn RelationStore,
        authorizer: &'a Authorizer,
    ) -> Self {
        RemoveGroupUseCase {
            groups,
            relations,
            authorizer,
        }
    }

    pub async fn execute(&self, caller: &Tag, name: &str) -> Result<(), DomainError> {
        self.authorizer.require_admin(caller).await?;
        let group = self.groups.remove(name).await?;
        // Drop every tuple that references the group on either side.
        let group_tag = Tag::group(&group.uuid);
        let member_side = wire(&group_tag.clone().with_relation("member"));
        for filter in [
            TupleFilter {
                target: Some(wire(&group_tag)),
                ..Default::default()
            },
            TupleFilter {
                object: Some(member_side),
                ..Default::default()
            },
        ] {
            let mut token = String::new();
            loop {
                let (tuples, next) = self
                    .relations
                    .list_relationship_tuples(&filter, 100, &token)
                    .await?;
                if tuples.is_empty() {
                    break;
                }
                self.relations.remove_relation(&tuples).await?;
                if next.is_empty() {
                    break;
                }
                token = next;
            }
        }
        Ok(())
    }
}

pub struct ListGroupsUseCase<'a> {
    groups: &'a dyn GroupRepository,
    authorizer: &'a Authorizer,
}

impl<'a> ListGroupsUseCase<'a> {
    pub fn new(groups: &'a dyn GroupRepository, authorizer: &'a Authorizer) -> Self {
        ListGroupsUseCase { groups, authorizer }
    }

    pub async fn execute(&self, caller: &Tag) -> Result<Vec<GroupInfo>, DomainError> {
        self.authorizer.require_admin(caller).await?;
        let groups = self.groups.list().await?;
        Ok(groups.iter().map(GroupInfo::from).collect())
    }
}
