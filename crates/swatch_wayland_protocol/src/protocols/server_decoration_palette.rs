//! `org_kde_kwin_server_decoration_palette_manager` version 1. Lets a client tell the server which
//! color palette to use for the server side decoration of one of its surfaces.

use std::borrow::Cow;

use crate::{
    MessageHeader, ObjectId,
    buffer::{ArgumentError, Arguments},
    client::Ctx,
    protocols::wayland::invalid_method,
};

/// Posted on the manager when `create` references a surface that does not exist
pub const ORG_KDE_KWIN_SERVER_DECORATION_PALETTE_MANAGER_ERROR_INVALID_SURFACE: u32 = 0;

pub trait OrgKdeKwinServerDecorationPaletteManager {
    fn create(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &OrgKdeKwinServerDecorationPaletteManagerCreate,
    ) -> anyhow::Result<()>;

    fn handle_request(
        &mut self,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()> {
        match header.opcode {
            0 => {
                let params = OrgKdeKwinServerDecorationPaletteManagerCreate::decode(data)
                    .map_err(|err| ctx.invalid_arguments(header, err))?;
                self.create(ctx, header.object_id, &params)
            }
            _ => invalid_method(ctx, header),
        }
    }
}

#[derive(Debug)]
pub struct OrgKdeKwinServerDecorationPaletteManagerCreate {
    pub id: ObjectId,
    pub surface: ObjectId,
}

impl OrgKdeKwinServerDecorationPaletteManagerCreate {
    fn decode(data: &[u8]) -> Result<Self, ArgumentError> {
        let mut args = Arguments::new(data);
        let id = args.new_id()?;
        let surface = args.object()?;
        args.finish()?;
        Ok(Self { id, surface })
    }
}

pub trait OrgKdeKwinServerDecorationPalette {
    fn set_palette(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &OrgKdeKwinServerDecorationPaletteSetPalette<'_>,
    ) -> anyhow::Result<()>;

    fn release(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &OrgKdeKwinServerDecorationPaletteRelease,
    ) -> anyhow::Result<()>;

    fn handle_request(
        &mut self,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()> {
        match header.opcode {
            0 => {
                let params = OrgKdeKwinServerDecorationPaletteSetPalette::decode(data)
                    .map_err(|err| ctx.invalid_arguments(header, err))?;
                self.set_palette(ctx, header.object_id, &params)
            }
            1 => {
                let params = OrgKdeKwinServerDecorationPaletteRelease::decode(data)
                    .map_err(|err| ctx.invalid_arguments(header, err))?;
                self.release(ctx, header.object_id, &params)
            }
            _ => invalid_method(ctx, header),
        }
    }
}

#[derive(Debug)]
pub struct OrgKdeKwinServerDecorationPaletteSetPalette<'data> {
    /// Opaque to the server, so malformed UTF-8 is replaced rather than rejected
    pub palette: Cow<'data, str>,
}

impl<'data> OrgKdeKwinServerDecorationPaletteSetPalette<'data> {
    fn decode(data: &'data [u8]) -> Result<Self, ArgumentError> {
        let mut args = Arguments::new(data);
        let palette = args.string_lossy()?;
        args.finish()?;
        Ok(Self { palette })
    }
}

#[derive(Debug)]
pub struct OrgKdeKwinServerDecorationPaletteRelease;

impl OrgKdeKwinServerDecorationPaletteRelease {
    fn decode(data: &[u8]) -> Result<Self, ArgumentError> {
        Arguments::new(data).finish()?;
        Ok(Self)
    }
}
