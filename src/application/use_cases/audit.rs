use chrono::{DateTime, Utc};

use crate::application::dto::*;
use crate::domain::errors::DomainError;
use crate::domain::repositories::{AuditLogFilter, AuditLogRepository};
use crate::domain::value_objects::{Kind, Tag};
use crate::permissions::Authorizer;

pub struct FindAuditEventsUseCase<'a> {
    audit: &'a dyn AuditLogRepository,
    authorizer: &'a Authorizer,
}

impl<'a> FindAuditEventsUseCase<'a> {
    pub fn new(audit: &'a dyn AuditLogRepository, authorizer: &'a Authorizer) -> Self {
        FindAuditEventsUseCase { audit, authorizer }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        request: FindAuditEventsRequest,
    ) -> Result<Vec<AuditEventDto>, DomainError> {
        if !self.authorizer.can_audit(caller).await? {
            return Err(DomainError::Unauthorized);
        }
        let filter = AuditLogFilter {
            start: request.after,
            end: request.before,
            user_tag: request.user_tag,
            method: request.method,
            model: request.model,
            limit: request.limit,
            offset: request.offset,
        };
        let entries = self.audit.find(&filter).await?;
        Ok(entries.iter().map(AuditEventDto::from).collect())
    }
}

fn parse_user_tag(tag: &str) -> Result<Tag, DomainError> {
    let parsed = Tag::parse(tag)?;
    if !matches!(parsed.kind, Kind::User | Kind::ServiceAccount) {
        return Err(DomainError::BadRequest(format!(
            "{:?} is not a user tag",
            tag
        )));
    }
    Ok(parsed)
}

pub struct GrantAuditLogAccessUseCase<'a> {
    authorizer: &'a Authorizer,
}

impl<'a> GrantAuditLogAccessUseCase<'a> {
    pub fn new(authorizer: &'a Authorizer) -> Self {
        GrantAuditLogAccessUseCase { authorizer }
    }

    pub async fn execute(&self, caller: &Tag, user_tag: &str) -> Result<(), DomainError> {
        self.authorizer.require_admin(caller).await?;
        let user = parse_user_tag(user_tag)?;
        self.authorizer.grant_audit_log_access(&user).await
    }
}

pub struct RevokeAuditLogAccessUseCase<'a> {
    authorizer: &'a Authorizer,
}

impl<'a> RevokeAuditLogAccessUseCase<'a> {
    pub fn new(authorizer: &'a Authorizer) -> Self {
        RevokeAuditLogAccessUseCase { authorizer }
    }

    pub async fn execute(&self, caller: &Tag, user_tag: &str) -> Result<(), DomainError> {
        self.authorizer.require_admin(caller).await?;
        let user = parse_user_tag(user_tag)?;
        self.authorizer.revoke_audit_log_access(&user).await
    }
}

pub struct PurgeAuditLogUseCase<'a> {
    audit: &'a dyn AuditLogRepository,
    authorizer: &'a Authorizer,
}

impl<'a> PurgeAuditLogUseCase<'a> {
    pub fn new(audit: &'a dyn AuditLogRepository, authorizer: &'a Authorizer) -> Self {
        PurgeAuditLogUseCase { audit, authorizer }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        before: DateTime<Utc>,
    ) -> Result<u64, DomainError> {
        self.authorizer.require_admin(caller).await?;
        self.audit.purge(before).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user_tag() {
        assert!(parse_user_tag("user-bob@x.com").is_ok());
        assert!(parse_user_tag("serviceaccount-bot@serviceaccount").is_ok());
        assert!(parse_user_tag("cloud-aws").is_err());
    }
}
