use log::debug;
use swatch_wayland_protocol::{
    Ctx, ObjectId,
    protocols::wayland::WL_DISPLAY_ERROR_INVALID_OBJECT,
    registry::{InterfaceIndex, RegistryError},
};

mod server_decoration_palette;
mod wayland;

/// Registers an object whose id the client picked in a request. Posts the matching protocol error
/// if the id can not be used.
fn register_new_object(
    ctx: &mut Ctx,
    object_id: ObjectId,
    interface_index: InterfaceIndex,
) -> anyhow::Result<()> {
    match ctx.registry.register_object(object_id, interface_index) {
        Ok(()) => Ok(()),
        Err(err @ RegistryError::Exhausted(_)) => {
            debug!(
                "Unable to create {} for client {}: {err}",
                interface_index.interface_name(),
                ctx.client_id
            );
            ctx.post_no_memory();
            Err(err.into())
        }
        Err(err) => {
            ctx.post_error(object_id, WL_DISPLAY_ERROR_INVALID_OBJECT, &err.to_string());
            Err(err.into())
        }
    }
}
