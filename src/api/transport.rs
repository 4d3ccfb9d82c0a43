use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

use crate::auth::AccessToken;
use crate::domain::customer::{
    CustomerId, CustomerRecord, CustomerSearchFilter, CustomerStatistics, CustomerType, Email,
    PagedResult,
};

use super::dto::{CreateCustomerRequest, UpdateCustomerRequest};
use super::{ApiError, ApiResult};

/// Status changes that have their own endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusAction {
    Activate,
    Deactivate,
    Delete,
    Restore,
}

impl StatusAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatusAction::Activate => "activate",
            StatusAction::Deactivate => "deactivate",
            StatusAction::Delete => "delete",
            StatusAction::Restore => "restore",
        }
    }
}

/// One uncached call to the customer service. Implementations know nothing
/// about caching, retries or token refresh.
#[async_trait]
pub trait CustomerTransport: Send + Sync {
    async fn get_customer(&self, token: AccessToken, id: CustomerId) -> ApiResult<Option<CustomerRecord>>;

    async fn get_customer_by_email(&self, token: AccessToken, email: &Email) -> ApiResult<Option<CustomerRecord>>;

    async fn list_customers(
        &self,
        token: AccessToken,
        filter: &CustomerSearchFilter,
    ) -> ApiResult<PagedResult<CustomerRecord>>;

    async fn customers_by_city(&self, token: AccessToken, city: &str) -> ApiResult<Vec<CustomerRecord>>;

    async fn customers_by_state(&self, token: AccessToken, state: &str) -> ApiResult<Vec<CustomerRecord>>;

    async fn customers_by_type(
        &self,
        token: AccessToken,
        customer_type: CustomerType,
    ) -> ApiResult<Vec<CustomerRecord>>;

    async fn statistics(&self, token: AccessToken) -> ApiResult<CustomerStatistics>;

    async fn create(&self, token: AccessToken, request: &CreateCustomerRequest) -> ApiResult<CustomerRecord>;

    async fn update(
        &self,
        token: AccessToken,
        id: CustomerId,
        request: &UpdateCustomerRequest,
    ) -> ApiResult<CustomerRecord>;

    async fn transition(&self, token: AccessToken, id: CustomerId, action: StatusAction) -> ApiResult<CustomerRecord>;
}

// ============================================================================
// HTTP transport
// ============================================================================
//
//   GET    /api/customers/{id}
//   GET    /api/customers/by-email/{email}
//   GET    /api/customers?page=&pageSize=&search=&city=&state=&type=&status=&createdFrom=&createdTo=
//   GET    /api/customers/city/{city} | /state/{state} | /type/{type}
//   GET    /api/customers/statistics
//   POST   /api/customers
//   PUT    /api/customers/{id}
//   DELETE /api/customers/{id}
//   POST   /api/customers/{id}/activate | /deactivate | /restore
//
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ListQuery<'a> {
    page: u32,
    page_size: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    search: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    city: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<&'a str>,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    customer_type: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_from: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created_to: Option<DateTime<Utc>>,
}

impl<'a> From<&'a CustomerSearchFilter> for ListQuery<'a> {
    fn from(filter: &'a CustomerSearchFilter) -> Self {
        Self {
            page: filter.page,
            page_size: filter.page_size,
            search: filter.search_text.as_deref(),
            city: filter.city.as_deref(),
            state: filter.state.as_deref(),
            customer_type: filter.customer_type.map(|t| t.as_str()),
            status: filter.status.map(|s| s.as_str()),
            created_from: filter.created_from,
            created_to: filter.created_to,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpCustomerTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCustomerTransport {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> ApiResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ApiError::Transport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/customers{}", self.base_url, path)
    }

    fn request(&self, method: Method, path: &str, token: &AccessToken) -> RequestBuilder {
        self.client.request(method, self.url(path)).bearer_auth(token.expose())
    }

    async fn send<T: DeserializeOwned>(&self, operation: &'static str, request: RequestBuilder) -> ApiResult<T> {
        let response = request.send().await.map_err(|e| transport_error(operation, e))?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            tracing::debug!(operation, status = status.as_u16(), "Customer service rejected request");
            return Err(ApiError::from_status(operation, status.as_u16(), message));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| ApiError::Decode(format!("{operation}: {}", e.without_url())))
    }

    /// 404 becomes `None`
    async fn send_optional<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> ApiResult<Option<T>> {
        match self.send(operation, request).await {
            Ok(value) => Ok(Some(value)),
            Err(ApiError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn transport_error(operation: &'static str, error: reqwest::Error) -> ApiError {
    if error.is_timeout() {
        ApiError::Timeout { operation }
    } else {
        ApiError::Transport(format!("{operation}: {}", error.without_url()))
    }
}

fn segment(value: &str) -> String {
    urlencoding::encode(value.trim()).into_owned()
}

#[async_trait]
impl CustomerTransport for HttpCustomerTransport {
    async fn get_customer(&self, token: AccessToken, id: CustomerId) -> ApiResult<Option<CustomerRecord>> {
        let request = self.request(Method::GET, &format!("/{id}"), &token);
        self.send_optional("get_customer", request).await
    }

    async fn get_customer_by_email(&self, token: AccessToken, email: &Email) -> ApiResult<Option<CustomerRecord>> {
        let request = self.request(Method::GET, &format!("/by-email/{}", segment(email.as_str())), &token);
        self.send_optional("get_customer_by_email", request).await
    }

    async fn list_customers(
        &self,
        token: AccessToken,
        filter: &CustomerSearchFilter,
    ) -> ApiResult<PagedResult<CustomerRecord>> {
        let request = self.request(Method::GET, "", &token).query(&ListQuery::from(filter));
        self.send("list_customers", request).await
    }

    async fn customers_by_city(&self, token: AccessToken, city: &str) -> ApiResult<Vec<CustomerRecord>> {
        let request = self.request(Method::GET, &format!("/city/{}", segment(city)), &token);
        self.send("customers_by_city", request).await
    }

    async fn customers_by_state(&self, token: AccessToken, state: &str) -> ApiResult<Vec<CustomerRecord>> {
        let request = self.request(Method::GET, &format!("/state/{}", segment(state)), &token);
        self.send("customers_by_state", request).await
    }

    async fn customers_by_type(
        &self,
        token: AccessToken,
        customer_type: CustomerType,
    ) -> ApiResult<Vec<CustomerRecord>> {
        let request = self.request(Method::GET, &format!("/type/{customer_type}"), &token);
        self.send("customers_by_type", request).await
    }

    async fn statistics(&self, token: AccessToken) -> ApiResult<CustomerStatistics> {
        let request = self.request(Method::GET, "/statistics", &token);
        self.send("statistics", request).await
    }

    async fn create(&self, token: AccessToken, request: &CreateCustomerRequest) -> ApiResult<CustomerRecord> {
        let request = self.request(Method::POST, "", &token).json(request);
        self.send("create_customer", request).await
    }

    async fn update(
        &self,
        token: AccessToken,
        id: CustomerId,
        request: &UpdateCustomerRequest,
    ) -> ApiResult<CustomerRecord> {
        let request = self.request(Method::PUT, &format!("/{id}"), &token).json(request);
        self.send("update_customer", request).await
    }

    async fn transition(&self, token: AccessToken, id: CustomerId, action: StatusAction) -> ApiResult<CustomerRecord> {
        let request = match action {
            StatusAction::Delete => self.request(Method::DELETE, &format!("/{id}"), &token),
            other => self.request(Method::POST, &format!("/{id}/{}", other.as_str()), &token),
        };
        self.send(action.as_str(), request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls_are_built_under_api_prefix() {
        let transport = HttpCustomerTransport::new("http://crm.local/", Duration::from_secs(5)).unwrap();
        assert_eq!(transport.url("/statistics"), "http://crm.local/api/customers/statistics");
        assert_eq!(segment("New York"), "New%20York");
    }

    #[test]
    fn test_list_query_omits_unset_filters() {
        let filter = CustomerSearchFilter::new().with_type(CustomerType::Business).page(2, 50);
        let query = serde_json::to_value(ListQuery::from(&filter)).unwrap();

        assert_eq!(query["page"], 2);
        assert_eq!(query["pageSize"], 50);
        assert_eq!(query["type"], "business");
        assert!(query.get("city").is_none());
        assert!(query.get("createdFrom").is_none());
    }

    #[tokio::test]
    async fn test_unreachable_service_is_transient() {
        use crate::utils::IsTransient;

        let transport = HttpCustomerTransport::new("http://127.0.0.1:1", Duration::from_secs(2)).unwrap();
        let err = transport
            .get_customer(AccessToken::new("t"), CustomerId::new())
            .await
            .unwrap_err();

        assert!(err.is_transient(), "unexpected error: {err}");
    }
}
