//! List store access: the data provider contract, its REST and mock
//! implementations, and the registry selecting between them.

pub mod api_types;
pub mod cache;
pub mod client;
pub mod fixtures;
pub mod mock;
pub mod odata;
pub mod provider;
pub mod registry;
pub mod types;

pub use client::RestListClient;
pub use mock::{MockLatency, MockProvider};
pub use odata::{ListQuery, QueryOp};
pub use provider::DataProvider;
pub use registry::{ProviderRegistry, RegistryError, RuntimeMode};
pub use types::{
  cancellable, ListError, ListErrorKind, ListItem, ListRequest, ListResult, UploadFile,
  UploadedFile, User, UserProperties,
};
