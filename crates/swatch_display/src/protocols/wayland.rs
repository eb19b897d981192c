use log::debug;
use swatch_wayland_protocol::{
    Ctx, ObjectId,
    protocols::{WaylandProtocol, wayland::*},
    registry::InterfaceIndex,
};

use super::register_new_object;
use crate::{DisplayState, GlobalId};

impl WaylandProtocol for DisplayState {}

impl WlDisplay for DisplayState {
    fn sync(
        &mut self,
        ctx: &mut Ctx,
        _object_id: ObjectId,
        params: &WlDisplaySync,
    ) -> anyhow::Result<()> {
        register_new_object(ctx, params.callback, InterfaceIndex::WlCallback)?;
        ctx.writer.wl_callback_done(params.callback).callback_data(0);
        ctx.registry.free_object(params.callback, ctx.writer);
        Ok(())
    }

    fn get_registry(
        &mut self,
        ctx: &mut Ctx,
        _object_id: ObjectId,
        params: &WlDisplayGetRegistry,
    ) -> anyhow::Result<()> {
        register_new_object(ctx, params.registry, InterfaceIndex::WlRegistry)?;
        for (&name, global) in self.globals.iter() {
            ctx.writer
                .wl_registry_global(params.registry)
                .name(name)
                .interface(global.interface_index.interface_name())
                .version(global.version);
        }
        Ok(())
    }
}

impl WlRegistry for DisplayState {
    fn bind(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &WlRegistryBind<'_>,
    ) -> anyhow::Result<()> {
        let global_id: GlobalId = params.name;
        let Some(global) = self.globals.get(global_id) else {
            ctx.post_error(object_id, WL_DISPLAY_ERROR_INVALID_OBJECT, "invalid global");
            anyhow::bail!(
                "Client {} tried to bind unknown global {}",
                ctx.client_id,
                global_id
            );
        };
        let interface_name = global.interface_index.interface_name();
        if params.interface != interface_name {
            ctx.post_error(
                object_id,
                WL_DISPLAY_ERROR_INVALID_OBJECT,
                "invalid interface for global",
            );
            anyhow::bail!(
                "Client {} tried to bind global {} ({}) as {}",
                ctx.client_id,
                global_id,
                interface_name,
                params.interface
            );
        }
        if params.version == 0 || params.version > global.version {
            ctx.post_error(
                object_id,
                WL_DISPLAY_ERROR_INVALID_OBJECT,
                "invalid version for global",
            );
            anyhow::bail!(
                "Client {} tried to bind {} with version {}, but only {} is supported",
                ctx.client_id,
                interface_name,
                params.version,
                global.version
            );
        }

        register_new_object(ctx, params.id, global.interface_index)?;
        debug!(
            "Client {} bound {} version {} as {}",
            ctx.client_id, interface_name, params.version, params.id
        );
        Ok(())
    }
}

impl WlCompositor for DisplayState {
    fn create_surface(
        &mut self,
        ctx: &mut Ctx,
        _object_id: ObjectId,
        params: &WlCompositorCreateSurface,
    ) -> anyhow::Result<()> {
        register_new_object(ctx, params.id, InterfaceIndex::WlSurface)?;
        let surface = self.surface_manager.create_surface(ctx.client_id, params.id);
        debug!("Client {} created {} as {}", ctx.client_id, surface, params.id);
        Ok(())
    }

    fn create_region(
        &mut self,
        ctx: &mut Ctx,
        _object_id: ObjectId,
        params: &WlCompositorCreateRegion,
    ) -> anyhow::Result<()> {
        register_new_object(ctx, params.id, InterfaceIndex::WlRegion)
    }
}

impl WlSurface for DisplayState {
    fn destroy(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        _params: &WlSurfaceDestroy,
    ) -> anyhow::Result<()> {
        ctx.registry.free_object(object_id, ctx.writer);
        if let Some(surface) = self.surface_manager.destroy_surface(ctx.client_id, object_id) {
            self.palette_manager.surface_destroyed(surface);
        }
        Ok(())
    }
}

impl WlRegion for DisplayState {
    fn destroy(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        _params: &WlRegionDestroy,
    ) -> anyhow::Result<()> {
        ctx.registry.free_object(object_id, ctx.writer);
        Ok(())
    }
}
