pub mod api;
pub mod mock;
pub mod poller;
pub mod prism;
pub mod resolver;
pub mod spec_builder;
pub mod vm;

// exports so callers don't have to spell out the whole tree
pub use api::ManagementApi;
pub use poller::{PollSettings, TaskPoller};
pub use prism::PrismClient;
pub use resolver::IdentityResolver;
pub use spec_builder::SpecBuilder;
pub use vm::{AsyncTask, CloneRequest, CloneSpec, TaskStatus, VmDescriptor, VmIdentity};
