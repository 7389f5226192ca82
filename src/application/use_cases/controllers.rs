use std::str::FromStr;

use crate::application::dto::*;
use crate::domain::entities::{Controller, ControllerStats, HostPort};
use crate::domain::errors::DomainError;
use crate::domain::repositories::{CloudRepository, ControllerRepository, ModelRepository};
use crate::domain::value_objects::Tag;
use crate::infra::vault::SecretStore;
use crate::jujuapi::ConnectionPool;
use crate::permissions::Authorizer;

fn parse_host_port(addr: &str) -> Result<HostPort, DomainError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| DomainError::BadRequest(format!("invalid address {:?}", addr)))?;
    let port = u16::from_str(port)
        .map_err(|_| DomainError::BadRequest(format!("invalid address {:?}", addr)))?;
    if host.is_empty() {
        return Err(DomainError::BadRequest(format!("invalid address {:?}", addr)));
    }
    Ok(HostPort {
        host: host.to_string(),
        port,
        scope: String::new(),
    })
}

pub struct AddControllerUseCase<'a> {
    controllers: &'a dyn ControllerRepository,
    clouds: &'a dyn CloudRepository,
    secrets: &'a dyn SecretStore,
    pool: &'a ConnectionPool,
    authorizer: &'a Authorizer,
}

impl<'a> AddControllerUseCase<'a> {
    pub fn new(
        controllers: &'a dyn ControllerRepository,
        clouds: &'a dyn CloudRepository,
        secrets: &'a dyn SecretStore,
        pool: &'a ConnectionPool,
        authorizer: &'a Authorizer,
    ) -> Self {
        AddControllerUseCase {
            controllers,
            clouds,
            secrets,
            pool,
            authorizer,
        }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        request: AddControllerRequest,
    ) -> Result<ControllerInfo, DomainError> {
        self.authorizer.require_admin(caller).await?;
        if request.username.is_empty() || request.password.is_empty() {
            return Err(DomainError::BadRequest(
                "controller admin credentials are required".to_string(),
            ));
        }
        if request.public_address.is_none() && request.api_addresses.is_empty() {
            return Err(DomainError::BadRequest(
                "at least one controller address is required".to_string(),
            ));
        }
        if self.controllers.get_by_name(&request.name).await?.is_some() {
            return Err(DomainError::AlreadyExists(format!(
                "controller {}",
                request.name
            )));
        }

        let host_ports = request
            .api_addresses
            .iter()
            .map(|addr| parse_host_port(addr))
            .collect::<Result<Vec<_>, _>>()?;

        self.secrets
            .put_controller_credentials(&request.name, &request.username, &request.password)
            .await?;

        let mut controller = Controller {
            name: request.name.clone(),
            uuid: request.uuid,
            public_address: request.public_address.clone(),
            ca_cert: request.ca_certificate.clone(),
            admin_user: request.username.clone(),
            host_ports: if host_ports.is_empty() {
                vec![]
            } else {
                vec![host_ports]
            },
            cloud: request.cloud.clone().unwrap_or_default(),
            region: request.region.clone(),
            agent_version: None,
            deprecated: false,
            unavailable_since: None,
            monitor_lease_owner: None,
            monitor_lease_expiry: None,
            stats: ControllerStats::default(),
        };

        // Dial once to verify reachability and the self-reported UUID, and
        // learn the clouds the controller hosts.
        let conn = self.pool.open_api_from_doc(&controller).await?;
        let wire_clouds = conn.clouds().await?;
        drop(conn);

        let mut hosted: Vec<(String, Vec<String>)> = Vec::new();
        for (cloud_tag, wire) in wire_clouds {
            let cloud_name = cloud_tag
                .strip_prefix("cloud-")
                .unwrap_or(cloud_tag.as_str())
                .to_string();
            let cloud = crate::domain::entities::Cloud {
                name: cloud_name.clone(),
                cloud_type: wire.cloud_type,
                endpoint: wire.endpoint,
                identity_endpoint: wire.identity_endpoint,
                storage_endpoint: wire.storage_endpoint,
                auth_types: wire.auth_types,
                regions: wire
                    .regions
                    .iter()
                    .map(|region| crate::domain::entities::CloudRegion {
                        cloud: cloud_name.clone(),
                        name: region.name.clone(),
                        endpoint: region.endpoint.clone(),
                        identity_endpoint: region.identity_endpoint.clone(),
                        storage_endpoint: region.storage_endpoint.clone(),
                    })
                    .collect(),
            };
            self.clouds.upsert(&cloud).await?;
            hosted.push((
                cloud_name,
                cloud.regions.iter().map(|r| r.name.clone()).collect(),
            ));
        }
        hosted.sort();

        if controller.cloud.is_empty() {
            if let Some((cloud_name, regions)) = hosted.first() {
                controller.cloud = cloud_name.clone();
                controller.region = controller.region.take().or_else(|| regions.first().cloned());
            }
        }

        self.controllers.add(&controller).await?;
        for (cloud_name, regions) in &hosted {
            for region in regions {
                self.clouds
                    .set_region_controller(cloud_name, region, &controller.name)
                    .await?;
            }
        }

        Ok(ControllerInfo::from(&controller))
    }
}

pub struct RemoveControllerUseCase<'a> {
    controllers: &'a dyn ControllerRepository,
    models: &'a dyn ModelRepository,
    clouds: &'a dyn CloudRepository,
    secrets: &'a dyn SecretStore,
    authorizer: &'a Authorizer,
}

impl<'a> RemoveControllerUseCase<'a> {
    pub fn new(
        controllers: &'a dyn ControllerRepository,
        models: &'a dyn ModelRepository,
        clouds: &'a dyn CloudRepository,
        secrets: &'a dyn SecretStore,
        authorizer: &'a Authorizer,
    ) -> Self {
        RemoveControllerUseCase {
            controllers,
            models,
            clouds,
            secrets,
            authorizer,
        }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        request: RemoveControllerRequest,
    ) -> Result<(), DomainError> {
        self.authorizer.require_admin(caller).await?;
        let controller = self
            .controllers
            .get_by_name(&request.name)
            .await?
            .ok_or_else(|| DomainError::NotFound(format!("controller {}", request.name)))?;
        if !request.force && controller.unavailable_since.is_none() {
            return Err(DomainError::StillAlive(format!(
                "controller {}",
                request.name
            )));
        }
        self.models.remove_for_controller(&controller.name).await?;
        self.clouds
            .remove_region_controllers(&controller.name)
            .await?;
        self.controllers.remove(&controller.name).await?;
        self.secrets
            .delete(&format!("controllers/{}", controller.name))
            .await?;
        Ok(())
    }
}

pub struct SetControllerDeprecatedUseCase<'a> {
    controllers: &'a dyn ControllerRepository,
    authorizer: &'a Authorizer,
}

impl<'a> SetControllerDeprecatedUseCase<'a> {
    pub fn new(controllers: &'a dyn ControllerRepository, authorizer: &'a Authorizer) -> Self {
        SetControllerDeprecatedUseCase {
            controllers,
            authorizer,
        }
    }

    pub async fn execute(
        &self,
        caller: &Tag,
        request: SetControllerDeprecatedRequest,
    ) -> Result<(), DomainError> {
        self.authorizer.require_admin(caller).await?;
        self.controllers
            .set_deprecated(&request.name, request.deprecated)
            .await
    }
}

pub struct ListControllersUseCase<'a> {
    controllers: &'a dyn ControllerRepository,
    authorizer: &'a Authorizer,
}

impl<'a> ListControllersUseCase<'a> {
    pub fn new(controllers: &'a dyn ControllerRepository, authorizer: &'a Authorizer) -> Self {
        ListControllersUseCase {
            controllers,
            authorizer,
        }
    }

    pub async fn execute(&self, caller: &Tag) -> Result<Vec<ControllerInfo>, DomainError> {
        self.authorizer.require_admin(caller).await?;
        let controllers = self.controllers.list().await?;
        Ok(controllers.iter().map(ControllerInfo::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_host_port() {
        let hp = parse_host_port("juju.example.com:17070").unwrap();
        assert_eq!(hp.host, "juju.example.com");
        assert_eq!(hp.port, 17070);
        assert!(parse_host_port("no-port").is_err());
        assert!(parse_host_port(":17070").is_err());
        assert!(parse_host_port("host:notaport").is_err());
    }
}
