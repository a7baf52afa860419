// Notification 2.0 subscription management
//
// Server-side registrations that decide which changes are pushed to a
// channel. A listener connects to an existing subscription by name.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use tracing::{debug, info};

use crate::client::RestClient;
use crate::error::Error;

const SUBSCRIPTIONS_PATH: &str = "notification2/subscriptions";
const DEFAULT_PAGE_SIZE: usize = 100;

/// Scope of a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum SubscriptionContext {
    /// Changes to (or below) a single managed object.
    #[serde(rename = "mo")]
    #[strum(serialize = "mo")]
    ManagedObject,
    /// Tenant-wide changes.
    #[serde(rename = "tenant")]
    #[strum(serialize = "tenant")]
    Tenant,
}

/// API filter entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
pub enum ApiFilter {
    #[serde(rename = "*")]
    #[strum(serialize = "*")]
    All,
    #[serde(rename = "alarms")]
    #[strum(serialize = "alarms")]
    Alarms,
    #[serde(rename = "alarmsWithChildren")]
    #[strum(serialize = "alarmsWithChildren")]
    AlarmsWithChildren,
    #[serde(rename = "events")]
    #[strum(serialize = "events")]
    Events,
    #[serde(rename = "eventsWithChildren")]
    #[strum(serialize = "eventsWithChildren")]
    EventsWithChildren,
    #[serde(rename = "managedobjects")]
    #[strum(serialize = "managedobjects")]
    ManagedObjects,
    #[serde(rename = "measurements")]
    #[strum(serialize = "measurements")]
    Measurements,
    #[serde(rename = "operations")]
    #[strum(serialize = "operations")]
    Operations,
}

/// Reference to the managed object a subscription watches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub id: String,
}

/// Which changes are forwarded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub apis: Vec<ApiFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub type_filter: Option<String>,
}

/// A named Notification 2.0 subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Server-assigned id; `None` until created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Subscription name (alphanumeric).
    #[serde(rename = "subscription")]
    pub name: String,

    pub context: SubscriptionContext,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_filter: Option<SubscriptionFilter>,

    /// Fragments copied into each notification body (all when empty).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fragments_to_copy: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub non_persistent: Option<bool>,
}

impl Subscription {
    /// Subscription for changes to one managed object.
    pub fn managed_object(name: impl Into<String>, source_id: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            context: SubscriptionContext::ManagedObject,
            source: Some(SourceRef {
                id: source_id.into(),
            }),
            subscription_filter: None,
            fragments_to_copy: Vec::new(),
            non_persistent: None,
        }
    }

    /// Tenant-wide subscription.
    pub fn tenant(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            context: SubscriptionContext::Tenant,
            source: None,
            subscription_filter: None,
            fragments_to_copy: Vec::new(),
            non_persistent: None,
        }
    }

    pub fn with_apis(mut self, apis: impl IntoIterator<Item = ApiFilter>) -> Self {
        self.subscription_filter
            .get_or_insert_with(SubscriptionFilter::default)
            .apis = apis.into_iter().collect();
        self
    }

    pub fn with_type_filter(mut self, type_filter: impl Into<String>) -> Self {
        self.subscription_filter
            .get_or_insert_with(SubscriptionFilter::default)
            .type_filter = Some(type_filter.into());
        self
    }

    pub fn with_fragments<S: Into<String>>(mut self, fragments: impl IntoIterator<Item = S>) -> Self {
        self.fragments_to_copy = fragments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_non_persistent(mut self, non_persistent: bool) -> Self {
        self.non_persistent = Some(non_persistent);
        self
    }
}

/// Query parameters for listing, counting and bulk deletion.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionQuery {
    pub context: Option<SubscriptionContext>,
    pub source: Option<String>,
    pub subscription: Option<String>,
    pub type_filter: Option<String>,
}

impl SubscriptionQuery {
    fn pairs(&self) -> Vec<(&'static str, String)> {
        let mut pairs = Vec::new();
        if let Some(context) = self.context {
            pairs.push(("context", context.to_string()));
        }
        if let Some(ref source) = self.source {
            pairs.push(("source", source.clone()));
        }
        if let Some(ref subscription) = self.subscription {
            pairs.push(("subscription", subscription.clone()));
        }
        if let Some(ref type_filter) = self.type_filter {
            pairs.push(("typeFilter", type_filter.clone()));
        }
        pairs
    }
}

#[derive(Debug, Deserialize)]
struct SubscriptionPage {
    #[serde(default)]
    subscriptions: Vec<Subscription>,
    #[serde(default)]
    statistics: Option<PageStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PageStatistics {
    #[serde(default)]
    total_elements: Option<u64>,
}

/// Subscription endpoints.
#[derive(Debug, Clone, Copy)]
pub struct Subscriptions<'a> {
    client: &'a RestClient,
}

impl<'a> Subscriptions<'a> {
    pub fn new(client: &'a RestClient) -> Self {
        Self { client }
    }

    /// Create a subscription, returning it with its server-assigned id.
    pub async fn create(&self, subscription: &Subscription) -> Result<Subscription, Error> {
        let url = self.client.url(SUBSCRIPTIONS_PATH)?;
        let created: Subscription = self.client.post(url, subscription).await?;
        info!(
            name = %created.name,
            id = created.id.as_deref().unwrap_or("?"),
            "subscription created"
        );
        Ok(created)
    }

    /// Fetch a subscription by id.
    pub async fn get(&self, id: &str) -> Result<Subscription, Error> {
        let url = self.client.url(&format!("{SUBSCRIPTIONS_PATH}/{id}"))?;
        self.client.get(url).await
    }

    /// All subscriptions matching the query, across pages.
    pub async fn list(&self, query: &SubscriptionQuery) -> Result<Vec<Subscription>, Error> {
        let mut all = Vec::new();
        let mut page_number = 1_u32;
        loop {
            let mut url = self.client.url(SUBSCRIPTIONS_PATH)?;
            url.query_pairs_mut()
                .extend_pairs(query.pairs())
                .append_pair("pageSize", &DEFAULT_PAGE_SIZE.to_string())
                .append_pair("currentPage", &page_number.to_string());

            let page: SubscriptionPage = self.client.get(url).await?;
            let fetched = page.subscriptions.len();
            all.extend(page.subscriptions);
            debug!(page = page_number, fetched, "subscription page");

            if fetched < DEFAULT_PAGE_SIZE {
                break;
            }
            page_number += 1;
        }
        Ok(all)
    }

    /// Number of subscriptions matching the query.
    pub async fn count(&self, query: &SubscriptionQuery) -> Result<u64, Error> {
        let mut url = self.client.url(SUBSCRIPTIONS_PATH)?;
        url.query_pairs_mut()
            .extend_pairs(query.pairs())
            .append_pair("pageSize", "1")
            .append_pair("withTotalElements", "true");

        let page: SubscriptionPage = self.client.get(url).await?;
        page.statistics
            .and_then(|s| s.total_elements)
            .ok_or_else(|| Error::Deserialization {
                message: "response lacks statistics.totalElements".into(),
                body: String::new(),
            })
    }

    /// Delete a subscription by id.
    pub async fn delete(&self, id: &str) -> Result<(), Error> {
        let url = self.client.url(&format!("{SUBSCRIPTIONS_PATH}/{id}"))?;
        self.client.delete(url).await?;
        info!(id, "subscription deleted");
        Ok(())
    }

    /// Delete every subscription matching the query.
    pub async fn delete_by(&self, query: &SubscriptionQuery) -> Result<(), Error> {
        let mut url = self.client.url(SUBSCRIPTIONS_PATH)?;
        url.query_pairs_mut().extend_pairs(query.pairs());
        self.client.delete(url).await
    }
}
