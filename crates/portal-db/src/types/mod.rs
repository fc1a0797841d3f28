mod environment;
mod role;

pub use self::environment::Environment;
pub use self::role::RegistrationRole;
