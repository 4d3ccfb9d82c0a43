use crate::domain::customer::{CustomerId, CustomerSearchFilter, CustomerType, Email};

/// Deterministic cache keys, one per read operation and its parameters
#[derive(Debug, Clone)]
pub struct CacheKeys {
    prefix: String,
}

impl CacheKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn customer(&self, id: CustomerId) -> String {
        format!("{}:id:{}", self.prefix, id)
    }

    pub fn email(&self, email: &Email) -> String {
        format!("{}:email:{}", self.prefix, email)
    }

    pub fn page(&self, page: u32, page_size: u32) -> String {
        format!("{}:list:page:{}:{}", self.prefix, page, page_size)
    }

    /// The filter's JSON form is canonical: fixed field order, no map keys
    pub fn search(&self, filter: &CustomerSearchFilter) -> String {
        let canonical = serde_json::to_string(filter).unwrap_or_else(|_| format!("{filter:?}"));
        format!("{}:list:search:{}", self.prefix, canonical)
    }

    pub fn city(&self, city: &str) -> String {
        format!("{}:list:city:{}", self.prefix, city.trim().to_lowercase())
    }

    pub fn state(&self, state: &str) -> String {
        format!("{}:list:state:{}", self.prefix, state.trim().to_lowercase())
    }

    pub fn customer_type(&self, customer_type: CustomerType) -> String {
        format!("{}:list:type:{}", self.prefix, customer_type)
    }

    pub fn statistics(&self) -> String {
        format!("{}:stats", self.prefix)
    }

    pub fn list_pattern(&self) -> String {
        format!("{}:list:*", self.prefix)
    }

    pub fn email_pattern(&self) -> String {
        format!("{}:email:*", self.prefix)
    }
}

impl Default for CacheKeys {
    fn default() -> Self {
        Self::new("customers")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::pattern_matches;

    #[test]
    fn test_keys_are_deterministic() {
        let keys = CacheKeys::new("crm");
        let id = CustomerId::new();
        let filter = CustomerSearchFilter::new().with_city("Austin").page(2, 10);

        assert_eq!(keys.customer(id), format!("crm:id:{id}"));
        assert_eq!(keys.page(1, 20), "crm:list:page:1:20");
        assert_eq!(keys.search(&filter), keys.search(&filter.clone()));
        assert_ne!(keys.search(&filter), keys.search(&filter.clone().page(3, 10)));
        assert_eq!(keys.city(" Austin "), keys.city("austin"));
    }

    #[test]
    fn test_list_pattern_covers_every_list_key() {
        let keys = CacheKeys::default();
        let pattern = keys.list_pattern();

        assert!(pattern_matches(&pattern, &keys.page(1, 20)));
        assert!(pattern_matches(&pattern, &keys.search(&CustomerSearchFilter::new())));
        assert!(pattern_matches(&pattern, &keys.customer_type(CustomerType::Business)));
        assert!(!pattern_matches(&pattern, &keys.statistics()));
        assert!(!pattern_matches(&pattern, &keys.customer(CustomerId::new())));
    }
}
