mod capability;
mod connector;
mod endpoints;
mod headers;

pub use capability::OkxCapability;
pub use connector::{new_rest_client, OkxPrivateConnector, OkxPublicConnector};
pub use headers::{OkxErrorHandler, OkxHeaders};
