pub mod batch;
pub mod decommission;
pub mod logger;
pub mod provisioning;
pub mod session;
pub mod settings;

pub use batch::{create_default_fleet, create_fleet, create_instances_of_type, BatchReport};
pub use decommission::{destroy_managed, select_managed, DecommissionReport};
pub use provisioning::{device_plan, ProvisionError, Provisioner};
pub use session::{with_session, Credentials};
pub use settings::Settings;
