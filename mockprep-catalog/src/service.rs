use mockprep_core::models::{Resource, Service};
use mockprep_core::repository::CatalogRepository;
use mockprep_core::{CoreError, CoreResult};
use std::sync::Arc;

/// Read path over the service catalog, plus the admin upsert.
#[derive(Clone)]
pub struct Catalog {
    repo: Arc<dyn CatalogRepository>,
}

impl Catalog {
    pub fn new(repo: Arc<dyn CatalogRepository>) -> Self {
        Self { repo }
    }

    /// Services in display order (position, then id).
    pub async fn list_services(&self) -> CoreResult<Vec<Service>> {
        let mut services = self.repo.list_services().await?;
        services.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.id.cmp(&b.id)));
        Ok(services)
    }

    pub async fn list_bookable(&self) -> CoreResult<Vec<Service>> {
        Ok(self.list_services().await?.into_iter().filter(|s| s.is_bookable).collect())
    }

    pub async fn get_service(&self, id: &str) -> CoreResult<Service> {
        self.repo
            .get_service(id)
            .await?
            .ok_or_else(|| CoreError::not_found("service", id))
    }

    /// Like `get_service`, but refuses services that cannot currently be booked.
    pub async fn get_bookable(&self, id: &str) -> CoreResult<Service> {
        let service = self.get_service(id).await?;
        if !service.is_bookable {
            return Err(CoreError::ValidationError(format!("service '{}' is not bookable", id)));
        }
        Ok(service)
    }

    pub async fn upsert_service(&self, service: Service) -> CoreResult<Service> {
        validate_service(&service)?;
        self.repo.upsert_service(&service).await?;
        tracing::info!("Service {} saved (bookable: {})", service.id, service.is_bookable);
        Ok(service)
    }
}

fn validate_service(service: &Service) -> CoreResult<()> {
    if service.id.trim().is_empty() {
        return Err(CoreError::ValidationError("service id must not be empty".into()));
    }
    if !service
        .id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(CoreError::ValidationError(format!(
            "service id '{}' must be a lowercase slug",
            service.id
        )));
    }
    if service.name.trim().is_empty() {
        return Err(CoreError::ValidationError("service name must not be empty".into()));
    }
    if service.price < 0 {
        return Err(CoreError::ValidationError("service price must not be negative".into()));
    }
    if let Some(bad) = service.resources.iter().find(|r| !is_valid_resource(r)) {
        return Err(CoreError::ValidationError(format!(
            "resource '{}' needs a title and an http(s) url",
            bad.title()
        )));
    }
    Ok(())
}

fn is_valid_resource(resource: &Resource) -> bool {
    let url = resource.url();
    !resource.title().trim().is_empty() && (url.starts_with("https://") || url.starts_with("http://"))
}
