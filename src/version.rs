pub const NAME: &str = "telescope";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `telescope/0.3.0`, used for log banners and the PostgreSQL application name.
pub fn full_name() -> String {
  format!("{}/{}", NAME, VERSION)
}
