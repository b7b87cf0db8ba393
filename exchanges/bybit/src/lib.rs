mod capability;
mod connector;
mod endpoints;
mod headers;

pub use capability::BybitCapability;
pub use connector::{new_rest_client, BybitPrivateConnector, BybitPublicConnector};
pub use headers::{BybitErrorHandler, BybitHeaders};
