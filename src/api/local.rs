use async_trait::async_trait;
use std::sync::Arc;

use crate::auth::AccessToken;
use crate::domain::customer::{
    CustomerId, CustomerRecord, CustomerSearchFilter, CustomerService, CustomerStatistics, CustomerType, Email,
    PagedResult, ServiceError,
};

use super::dto::{CreateCustomerRequest, UpdateCustomerRequest};
use super::transport::{CustomerTransport, StatusAction};
use super::{ApiError, ApiResult};

/// Serves the transport contract from an in-process `CustomerService`.
/// Used by the demo binary and by tests; the token is accepted as is.
#[derive(Clone)]
pub struct LocalCustomerTransport {
    service: Arc<CustomerService>,
}

impl LocalCustomerTransport {
    pub fn new(service: Arc<CustomerService>) -> Self {
        Self { service }
    }
}

fn invalid(error: impl Into<ServiceError>) -> ApiError {
    ApiError::from(error.into())
}

#[async_trait]
impl CustomerTransport for LocalCustomerTransport {
    async fn get_customer(&self, _token: AccessToken, id: CustomerId) -> ApiResult<Option<CustomerRecord>> {
        match self.service.get(id).await {
            Ok(record) => Ok(Some(record)),
            Err(ServiceError::NotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_customer_by_email(&self, _token: AccessToken, email: &Email) -> ApiResult<Option<CustomerRecord>> {
        Ok(self.service.get_by_email(email).await?)
    }

    async fn list_customers(
        &self,
        _token: AccessToken,
        filter: &CustomerSearchFilter,
    ) -> ApiResult<PagedResult<CustomerRecord>> {
        Ok(self.service.search(filter).await?)
    }

    async fn customers_by_city(&self, _token: AccessToken, city: &str) -> ApiResult<Vec<CustomerRecord>> {
        Ok(self.service.list_by_city(city).await?)
    }

    async fn customers_by_state(&self, _token: AccessToken, state: &str) -> ApiResult<Vec<CustomerRecord>> {
        Ok(self.service.list_by_state(state).await?)
    }

    async fn customers_by_type(
        &self,
        _token: AccessToken,
        customer_type: CustomerType,
    ) -> ApiResult<Vec<CustomerRecord>> {
        Ok(self.service.list_by_type(customer_type).await?)
    }

    async fn statistics(&self, _token: AccessToken) -> ApiResult<CustomerStatistics> {
        Ok(self.service.statistics().await?)
    }

    async fn create(&self, _token: AccessToken, request: &CreateCustomerRequest) -> ApiResult<CustomerRecord> {
        let new = request.to_new_customer().map_err(invalid)?;
        Ok(self.service.register(new).await?)
    }

    async fn update(
        &self,
        _token: AccessToken,
        id: CustomerId,
        request: &UpdateCustomerRequest,
    ) -> ApiResult<CustomerRecord> {
        let update = request.to_profile_update().map_err(invalid)?;
        Ok(self.service.update_details(id, update, request.customer_type).await?)
    }

    async fn transition(&self, _token: AccessToken, id: CustomerId, action: StatusAction) -> ApiResult<CustomerRecord> {
        let record = match action {
            StatusAction::Activate => self.service.activate(id).await?,
            StatusAction::Deactivate => self.service.deactivate(id).await?,
            StatusAction::Delete => self.service.delete(id).await?,
            StatusAction::Restore => self.service.restore(id).await?,
        };
        Ok(record)
    }
}
