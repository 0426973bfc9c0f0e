/// Router Module Index
///
/// Routing split by access level. Each module maps to one identity class, and the access check
/// is attached as a layer in `create_router`.

/// Routes open to everyone, guests included.
/// Downloads live here; the guest quota is enforced inside the handler, not by a layer.
pub mod public;

/// Routes that need a logged-in identity (user or admin).
pub mod authenticated;

/// Routes restricted to the single admin identity.
pub mod admin;
