pub mod disclosure_attribute;
pub mod hostname;
pub mod organization;
pub mod registration;
