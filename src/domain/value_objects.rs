use std::fmt;
use std::str::FromStr;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::DomainError;

/// Reserved domain for service-account identities.
pub const SERVICE_ACCOUNT_DOMAIN: &str = "serviceaccount";

/// Relation names used in the ReBAC graph.
pub mod relations {
    pub const MEMBER: &str = "member";
    pub const ADMINISTRATOR: &str = "administrator";
    pub const READER: &str = "reader";
    pub const WRITER: &str = "writer";
    pub const CONSUMER: &str = "consumer";
    pub const CAN_ADDMODEL: &str = "can_addmodel";
    pub const AUDIT_LOG_VIEWER: &str = "audit_log_viewer";
    pub const CONTROLLER: &str = "controller";
}

static GROUP_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9._-]{4,}[A-Za-z0-9]$").unwrap());

/// Valida o nome de um grupo.
pub fn validate_group_name(name: &str) -> Result<(), DomainError> {
    if GROUP_NAME_RE.is_match(name) {
        Ok(())
    } else {
        Err(DomainError::BadRequest(format!(
            "invalid group name {:?}",
            name
        )))
    }
}

/// An identity name is email-shaped: `local@domain`, both parts non-empty.
pub fn is_valid_identity_name(name: &str) -> bool {
    let mut parts = name.splitn(2, '@');
    match (parts.next(), parts.next()) {
        (Some(local), Some(domain)) => {
            !local.is_empty()
                && !domain.is_empty()
                && !domain.contains('@')
                && !name.chars().any(char::is_whitespace)
        }
        _ => false,
    }
}

pub fn is_service_account(name: &str) -> bool {
    name.strip_suffix(&format!("@{}", SERVICE_ACCOUNT_DOMAIN))
        .map(|local| !local.is_empty())
        .unwrap_or(false)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    User,
    Group,
    Controller,
    Model,
    Cloud,
    ApplicationOffer,
    ServiceAccount,
}

impl Kind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::User => "user",
            Kind::Group => "group",
            Kind::Controller => "controller",
            Kind::Model => "model",
            Kind::Cloud => "cloud",
            Kind::ApplicationOffer => "applicationoffer",
            Kind::ServiceAccount => "serviceaccount",
        }
    }
}

impl FromStr for Kind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Kind::User),
            "group" => Ok(Kind::Group),
            "controller" => Ok(Kind::Controller),
            "model" => Ok(Kind::Model),
            "cloud" => Ok(Kind::Cloud),
            "applicationoffer" => Ok(Kind::ApplicationOffer),
            "serviceaccount" => Ok(Kind::ServiceAccount),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tagged identifier: `<kind>-<id>[#<relation>]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag {
    pub kind: Kind,
    pub id: String,
    pub relation: Option<String>,
}

impl Tag {
    pub fn new(kind: Kind, id: impl Into<String>) -> Self {
        Tag {
            kind,
            id: id.into(),
            relation: None,
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn user(name: &str) -> Self {
        Tag::new(Kind::User, name)
    }

    pub fn group(uuid: &Uuid) -> Self {
        Tag::new(Kind::Group, uuid.to_string())
    }

    pub fn controller(uuid: &Uuid) -> Self {
        Tag::new(Kind::Controller, uuid.to_string())
    }

    pub fn model(uuid: &Uuid) -> Self {
        Tag::new(Kind::Model, uuid.to_string())
    }

    pub fn cloud(name: &str) -> Self {
        Tag::new(Kind::Cloud, name)
    }

    /// Parse the strict tag grammar. The offending value is always included
    /// in the error so callers can report it verbatim.
    pub fn parse(s: &str) -> Result<Tag, DomainError> {
        let invalid = || DomainError::BadRequest(format!("{:?} is not a valid tag", s));

        let (kind_str, rest) = s.split_once('-').ok_or_else(invalid)?;
        let kind = Kind::from_str(kind_str).map_err(|_| invalid())?;

        let (id, relation) = match rest.split_once('#') {
            Some((id, rel)) => (id, Some(rel)),
            None => (rest, None),
        };
        if id.is_empty() {
            return Err(invalid());
        }
        if let Some(rel) = relation {
            if rel.is_empty() || !rel.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
                return Err(invalid());
            }
        }

        match kind {
            Kind::Group | Kind::Model => {
                Uuid::parse_str(id).map_err(|_| invalid())?;
            }
            Kind::User => {
                if !is_valid_identity_name(id) {
                    return Err(invalid());
                }
            }
            Kind::ServiceAccount => {
                if !is_service_account(id) {
                    return Err(invalid());
                }
            }
            Kind::Controller | Kind::Cloud | Kind::ApplicationOffer => {}
        }

        Ok(Tag {
            kind,
            id: id.to_string(),
            relation: relation.map(str::to_string),
        })
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{}", self.kind, self.id)?;
        if let Some(rel) = &self.relation {
            write!(f, "#{}", rel)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Life {
    Alive,
    Dying,
    Dead,
}

impl Life {
    pub fn as_str(&self) -> &'static str {
        match self {
            Life::Alive => "alive",
            Life::Dying => "dying",
            Life::Dead => "dead",
        }
    }
}

impl FromStr for Life {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "alive" => Ok(Life::Alive),
            "dying" => Ok(Life::Dying),
            "dead" => Ok(Life::Dead),
            other => Err(DomainError::BadRequest(format!(
                "invalid life value {:?}",
                other
            ))),
        }
    }
}

impl fmt::Display for Life {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Juju model access levels, ordered weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelAccess {
    Read,
    Write,
    Admin,
}

impl ModelAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            ModelAccess::Read => "read",
            ModelAccess::Write => "write",
            ModelAccess::Admin => "admin",
        }
    }

    /// Map a ReBAC relation on a model into the Juju access set.
    pub fn from_relation(relation: &str) -> Option<ModelAccess> {
        match relation {
            relations::READER => Some(ModelAccess::Read),
            relations::WRITER => Some(ModelAccess::Write),
            relations::ADMINISTRATOR => Some(ModelAccess::Admin),
            _ => None,
        }
    }
}

impl fmt::Display for ModelAccess {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControllerAccess {
    Login,
    Superuser,
}

impl ControllerAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            ControllerAccess::Login => "login",
            ControllerAccess::Superuser => "superuser",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CloudAccess {
    #[serde(rename = "add-model")]
    AddModel,
    #[serde(rename = "admin")]
    Admin,
}

impl CloudAccess {
    pub fn as_str(&self) -> &'static str {
        match self {
            CloudAccess::AddModel => "add-model",
            CloudAccess::Admin => "admin",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_round_trip() {
        let uuid = Uuid::new_v4();
        let cases = vec![
            format!("user-alice@external.com"),
            format!("group-{}", uuid),
            format!("controller-{}", uuid),
            format!("model-{}", uuid),
            format!("cloud-aws"),
            format!("applicationoffer-{}", uuid),
            format!("serviceaccount-bot-1@serviceaccount"),
            format!("model-{}#writer", uuid),
            format!("group-{}#member", uuid),
        ];
        for s in cases {
            let tag = Tag::parse(&s).unwrap_or_else(|e| panic!("{}: {}", s, e));
            assert_eq!(tag.to_string(), s);
        }
    }

    #[test]
    fn test_unknown_kind_is_rejected_with_value() {
        let err = Tag::parse("pokemon-diglett").unwrap_err();
        assert_eq!(
            err.to_string(),
            "bad request: \"pokemon-diglett\" is not a valid tag"
        );
    }

    #[test]
    fn test_group_id_must_be_uuid() {
        let uuid = Uuid::new_v4();
        let tag = Tag::parse(&format!("group-{}", uuid)).unwrap();
        assert_eq!(tag.kind, Kind::Group);
        assert_eq!(tag.id, uuid.to_string());
        assert!(Tag::parse("group-engineering").is_err());
    }

    #[test]
    fn test_service_account_domain_enforced() {
        assert!(Tag::parse("serviceaccount-bot@serviceaccount").is_ok());
        assert!(Tag::parse("serviceaccount-bot@example.com").is_err());
        assert!(Tag::parse("serviceaccount-@serviceaccount").is_err());
    }

    #[test]
    fn test_group_name_validation() {
        assert!(validate_group_name("engineers").is_ok());
        assert!(validate_group_name("team.a-b_c1").is_ok());
        // too short, leading digit, trailing separator
        assert!(validate_group_name("abc").is_err());
        assert!(validate_group_name("1engineers").is_err());
        assert!(validate_group_name("engineers-").is_err());
    }

    #[test]
    fn test_identity_names() {
        assert!(is_valid_identity_name("alice@canonical.com"));
        assert!(is_valid_identity_name("bot@serviceaccount"));
        assert!(!is_valid_identity_name("alice"));
        assert!(!is_valid_identity_name("@nodomain"));
        assert!(!is_valid_identity_name("two words@x.com"));
    }

    #[test]
    fn test_model_access_ordering_and_mapping() {
        assert!(ModelAccess::Admin > ModelAccess::Write);
        assert_eq!(
            ModelAccess::from_relation(relations::WRITER),
            Some(ModelAccess::Write)
        );
        assert_eq!(ModelAccess::from_relation("owner"), None);
    }
}
