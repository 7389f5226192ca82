//! JIMM facade: fleet administration over the websocket RPC surface.

use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::application::dto::*;
use crate::application::use_cases::audit::*;
use crate::application::use_cases::controllers::*;
use crate::application::use_cases::credentials::*;
use crate::application::use_cases::groups::*;
use crate::application::use_cases::models::*;
use crate::application::use_cases::relations::*;
use crate::domain::errors::DomainError;
use crate::presentation::facades::HandlerFuture;
use crate::presentation::websocket::WsSession;

pub fn list_controllers<'a>(session: &'a mut WsSession, _params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let state = session.state.clone();
        let uc = ListControllersUseCase::new(state.controllers.as_ref(), &state.authorizer);
        let controllers = uc.execute(&caller).await?;
        Ok(json!({ "controllers": controllers }))
    })
}

pub fn add_controller<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: AddControllerRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = AddControllerUseCase::new(
            state.controllers.as_ref(),
            state.clouds.as_ref(),
            state.secrets.as_ref(),
            &state.pool,
            &state.authorizer,
        );
        let info = uc.execute(&caller, request).await?;
        Ok(serde_json::to_value(info)?)
    })
}

pub fn remove_controller<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: RemoveControllerRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = RemoveControllerUseCase::new(
            state.controllers.as_ref(),
            state.models.as_ref(),
            state.clouds.as_ref(),
            state.secrets.as_ref(),
            &state.authorizer,
        );
        uc.execute(&caller, request).await?;
        Ok(json!({}))
    })
}

pub fn set_controller_deprecated<'a>(
    session: &'a mut WsSession,
    params: Value,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: SetControllerDeprecatedRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = SetControllerDeprecatedUseCase::new(state.controllers.as_ref(), &state.authorizer);
        uc.execute(&caller, request).await?;
        Ok(json!({}))
    })
}

pub fn add_model<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: AddModelRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = AddModelUseCase::new(
            state.controllers.as_ref(),
            state.clouds.as_ref(),
            state.models.as_ref(),
            state.identities.as_ref(),
            &state.pool,
            &state.authorizer,
        );
        let info = uc.execute(&caller, request).await?;
        Ok(serde_json::to_value(info)?)
    })
}

pub fn update_cloud_credential<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: UpdateCloudCredentialRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = UpdateCloudCredentialUseCase::new(
            state.credentials.as_ref(),
            state.secrets.as_ref(),
            &state.authorizer,
        );
        uc.execute(&caller, request).await?;
        Ok(json!({}))
    })
}

#[derive(Debug, Default, Deserialize)]
struct ListCredentialsParams {
    #[serde(default)]
    owner: Option<String>,
}

pub fn list_cloud_credentials<'a>(
    session: &'a mut WsSession,
    params: Value,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: ListCredentialsParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = ListCloudCredentialsUseCase::new(state.credentials.as_ref(), &state.authorizer);
        let credentials = uc.execute(&caller, params.owner.as_deref()).await?;
        Ok(json!({ "credentials": credentials }))
    })
}

pub fn list_models<'a>(session: &'a mut WsSession, _params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let state = session.state.clone();
        let uc = ListModelsUseCase::new(state.models.as_ref(), &state.authorizer);
        let models = uc.execute(&caller).await?;
        Ok(json!({ "models": models }))
    })
}

pub fn import_model<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: ImportModelRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = ImportModelUseCase::new(
            state.controllers.as_ref(),
            state.models.as_ref(),
            state.identities.as_ref(),
            &state.pool,
            &state.authorizer,
        );
        let info = uc.execute(&caller, request).await?;
        Ok(serde_json::to_value(info)?)
    })
}

pub fn update_migrated_model<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: UpdateMigratedModelRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = UpdateMigratedModelUseCase::new(
            state.controllers.as_ref(),
            state.models.as_ref(),
            &state.authorizer,
        );
        uc.execute(&caller, request).await?;
        Ok(json!({}))
    })
}

pub fn initiate_migration<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: MigrateModelRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = MigrateModelUseCase::new(
            state.controllers.as_ref(),
            state.models.as_ref(),
            state.secrets.as_ref(),
            &state.pool,
            &state.authorizer,
        );
        let migration_id = uc.execute(&caller, request).await?;
        Ok(json!({ "migration-id": migration_id }))
    })
}

pub fn find_audit_events<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: FindAuditEventsRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = FindAuditEventsUseCase::new(state.audit.as_ref(), &state.authorizer);
        let events = uc.execute(&caller, request).await?;
        Ok(json!({ "events": events }))
    })
}

#[derive(Debug, Deserialize)]
struct AuditAccessParams {
    #[serde(rename = "user-tag")]
    user_tag: String,
}

pub fn grant_audit_log_access<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: AuditAccessParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = GrantAuditLogAccessUseCase::new(&state.authorizer);
        uc.execute(&caller, &params.user_tag).await?;
        Ok(json!({}))
    })
}

pub fn revoke_audit_log_access<'a>(
    session: &'a mut WsSession,
    params: Value,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: AuditAccessParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = RevokeAuditLogAccessUseCase::new(&state.authorizer);
        uc.execute(&caller, &params.user_tag).await?;
        Ok(json!({}))
    })
}

#[derive(Debug, Deserialize)]
struct PurgeLogsParams {
    before: chrono::DateTime<Utc>,
}

pub fn purge_logs<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: PurgeLogsParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = PurgeAuditLogUseCase::new(state.audit.as_ref(), &state.authorizer);
        let deleted = uc.execute(&caller, params.before).await?;
        Ok(json!({ "deleted-count": deleted }))
    })
}

pub fn add_group<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: AddGroupRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = AddGroupUseCase::new(state.groups.as_ref(), &state.authorizer);
        let group = uc.execute(&caller, request).await?;
        Ok(serde_json::to_value(group)?)
    })
}

pub fn rename_group<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: RenameGroupRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = RenameGroupUseCase::new(state.groups.as_ref(), &state.authorizer);
        let group = uc.execute(&caller, request).await?;
        Ok(serde_json::to_value(group)?)
    })
}

#[derive(Debug, Deserialize)]
struct RemoveGroupParams {
    name: String,
}

pub fn remove_group<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: RemoveGroupParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = RemoveGroupUseCase::new(
            state.groups.as_ref(),
            state.relations.as_ref(),
            &state.authorizer,
        );
        uc.execute(&caller, &params.name).await?;
        Ok(json!({}))
    })
}

pub fn list_groups<'a>(session: &'a mut WsSession, _params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let state = session.state.clone();
        let uc = ListGroupsUseCase::new(state.groups.as_ref(), &state.authorizer);
        let groups = uc.execute(&caller).await?;
        Ok(json!({ "groups": groups }))
    })
}

#[derive(Debug, Deserialize)]
struct TuplesParams {
    tuples: Vec<RelationDto>,
}

pub fn add_relation<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: TuplesParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = AddRelationUseCase::new(state.relations.as_ref(), &state.authorizer);
        uc.execute(&caller, &params.tuples).await?;
        Ok(json!({}))
    })
}

pub fn remove_relation<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: TuplesParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = RemoveRelationUseCase::new(state.relations.as_ref(), &state.authorizer);
        uc.execute(&caller, &params.tuples).await?;
        Ok(json!({}))
    })
}

#[derive(Debug, Deserialize)]
struct CheckRelationParams {
    tuple: RelationDto,
}

pub fn check_relation<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: CheckRelationParams = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = CheckRelationUseCase::new(state.relations.as_ref(), &state.authorizer);
        let allowed = uc.execute(&caller, &params.tuple).await?;
        Ok(json!({ "allowed": allowed }))
    })
}

pub fn list_relationship_tuples<'a>(
    session: &'a mut WsSession,
    params: Value,
) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let request: ListRelationshipTuplesRequest = serde_json::from_value(params)?;
        let state = session.state.clone();
        let uc = ListRelationshipTuplesUseCase::new(state.relations.as_ref(), &state.authorizer);
        let (tuples, token) = uc.execute(&caller, &request).await?;
        Ok(json!({ "tuples": tuples, "continuation-token": token }))
    })
}

#[derive(Debug, Deserialize)]
struct CrossModelQueryParams {
    #[serde(rename = "type", default)]
    query_type: Option<String>,
    #[serde(default)]
    query: Option<String>,
}

/// Query every readable model's status in one call. Only the identity jq
/// query is evaluated here; anything richer is not implemented.
pub fn cross_model_query<'a>(session: &'a mut WsSession, params: Value) -> HandlerFuture<'a> {
    Box::pin(async move {
        let caller = session.require_auth()?;
        let params: CrossModelQueryParams = serde_json::from_value(params)?;
        match params.query_type.as_deref() {
            None | Some("jq") => {}
            Some(_) => return Err(DomainError::BadRequest("unknown query type".to_string())),
        }
        match params.query.as_deref() {
            None | Some("") | Some(".") => {}
            Some(_) => return Err(DomainError::NotImplemented),
        }

        let state = session.state.clone();
        let uc = ListModelsUseCase::new(state.models.as_ref(), &state.authorizer);
        let models = uc.execute(&caller).await?;

        let mut results = serde_json::Map::new();
        let mut errors = serde_json::Map::new();
        for model in models {
            let status = async {
                let conn = state.pool.open_api(&model.controller).await?;
                conn.full_status().await
            }
            .await;
            match status {
                Ok(status) => {
                    results.insert(model.uuid.to_string(), json!([status]));
                }
                Err(e) => {
                    errors.insert(model.uuid.to_string(), json!([e.to_string()]));
                }
            }
        }
        Ok(json!({ "results": results, "errors": errors }))
    })
}
