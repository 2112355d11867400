pub mod zendesk;

pub use zendesk::ZendeskClient;
