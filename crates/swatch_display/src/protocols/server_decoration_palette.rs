use anyhow::Context;
use log::warn;
use swatch_wayland_protocol::{
    ClientId, Ctx, ObjectId,
    protocols::{ServerDecorationPaletteProtocol, server_decoration_palette::*},
    registry::{InterfaceIndex, RegistryError},
};

use crate::{DisplayState, PaletteKey, PaletteTransport};

impl PaletteTransport for Ctx<'_> {
    fn client_id(&self) -> ClientId {
        self.client_id
    }

    fn create_resource(&mut self, id: ObjectId) -> Result<(), RegistryError> {
        self.registry
            .register_object(id, InterfaceIndex::OrgKdeKwinServerDecorationPalette)
    }

    fn post_error(&mut self, object_id: ObjectId, code: u32, message: &str) {
        Ctx::post_error(self, object_id, code, message);
    }

    fn post_no_memory(&mut self) {
        Ctx::post_no_memory(self);
    }
}

impl ServerDecorationPaletteProtocol for DisplayState {}

impl OrgKdeKwinServerDecorationPaletteManager for DisplayState {
    fn create(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &OrgKdeKwinServerDecorationPaletteManagerCreate,
    ) -> anyhow::Result<()> {
        self.palette_manager
            .create_palette(ctx, &self.surface_manager, object_id, params.surface, params.id)
            .context("Unable to create palette")?;
        Ok(())
    }
}

impl OrgKdeKwinServerDecorationPalette for DisplayState {
    fn set_palette(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &OrgKdeKwinServerDecorationPaletteSetPalette<'_>,
    ) -> anyhow::Result<()> {
        let key = PaletteKey::new(ctx.client_id, object_id);
        match self.palette_manager.palette_mut(key) {
            Some(palette) => {
                palette.set_palette(&params.palette);
            }
            None => warn!("Received set_palette for unknown {key}"),
        }
        Ok(())
    }

    fn release(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        _params: &OrgKdeKwinServerDecorationPaletteRelease,
    ) -> anyhow::Result<()> {
        ctx.registry.free_object(object_id, ctx.writer);
        self.palette_manager
            .destroy_palette(PaletteKey::new(ctx.client_id, object_id));
        Ok(())
    }
}
