use super::config::ListenerConfig;
use super::subscriptions::SubscriptionContext;
use super::tokens::TokenRequest;

const TOKEN_TYPE: &str = "notification";

/// The channel a listener consumes: which subscription, as which subscriber.
///
/// Immutable once built; the listener owns it for its whole lifetime.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSubscription {
    tenant: Option<String>,
    context: SubscriptionContext,
    name: String,
    subscriber: String,
    consumer: Option<String>,
    shared: bool,
}

impl ChannelSubscription {
    /// Channel for the named subscription.
    ///
    /// The subscriber name defaults to the subscription name with every
    /// non-alphanumeric character removed (the platform only accepts
    /// alphanumeric subscriber names).
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        let subscriber = name.chars().filter(char::is_ascii_alphanumeric).collect();
        Self {
            tenant: None,
            context: SubscriptionContext::ManagedObject,
            name,
            subscriber,
            consumer: None,
            shared: false,
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn with_context(mut self, context: SubscriptionContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_subscriber(mut self, subscriber: impl Into<String>) -> Self {
        self.subscriber = subscriber.into();
        self
    }

    /// Consumer name, distinguishing connections of one shared subscriber.
    pub fn with_consumer(mut self, consumer: impl Into<String>) -> Self {
        self.consumer = Some(consumer.into());
        self
    }

    /// Shared subscribers split the message stream between their consumers.
    pub fn with_shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn context(&self) -> SubscriptionContext {
        self.context
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn subscriber(&self) -> &str {
        &self.subscriber
    }

    pub fn consumer(&self) -> Option<&str> {
        self.consumer.as_deref()
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Token request for one connection attempt.
    pub fn token_request(&self, config: &ListenerConfig) -> TokenRequest {
        TokenRequest {
            subscriber: self.subscriber.clone(),
            subscription: self.name.clone(),
            expires_in_minutes: config.token_validity_minutes,
            shared: self.shared,
            token_type: TOKEN_TYPE.to_owned(),
            non_persistent: config.non_persistent,
        }
    }
}
