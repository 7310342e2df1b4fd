pub mod data_value;
pub mod object_id;
pub mod object_type;
pub mod property_id;
pub mod units;

pub use data_value::DataValue;
pub use object_id::{ObjectId, ParseObjectIdError};
pub use object_type::ObjectType;
pub use property_id::PropertyId;
pub use units::engineering_units_name;
