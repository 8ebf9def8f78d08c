use oso::PolarClass;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The deployment as a whole. Actions that are not about one booking or
/// driver (creating bookings, registering vehicles, sweeping) are authorized
/// against it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Platform {
    id: Uuid,
}

impl Platform {
    pub fn default() -> Self {
        Self { id: Uuid::nil() }
    }
}

impl PolarClass for Platform {
    fn get_polar_class_builder() -> oso::ClassBuilder<Platform> {
        oso::Class::builder()
            .name("Platform")
            .add_attribute_getter("id", |recv: &Platform| recv.id)
    }

    fn get_polar_class() -> oso::Class {
        let builder = Platform::get_polar_class_builder();
        builder.build()
    }
}
