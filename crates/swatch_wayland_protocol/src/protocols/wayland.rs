//! The subset of the core wayland protocol needed to host the decoration palette extension.

use log::debug;

use crate::{
    MessageHeader, ObjectId,
    buffer::{ArgumentError, Arguments, Writer},
    client::Ctx,
};

pub const WL_DISPLAY_ERROR_INVALID_OBJECT: u32 = 0;
pub const WL_DISPLAY_ERROR_INVALID_METHOD: u32 = 1;
pub const WL_DISPLAY_ERROR_NO_MEMORY: u32 = 2;

/// Highest `wl_surface` opcode up to version 6 (`offset`)
const WL_SURFACE_MAX_OPCODE: u16 = 10;
/// Highest `wl_region` opcode (`subtract`)
const WL_REGION_MAX_OPCODE: u16 = 2;

/// Reports a request with an unknown opcode
pub(crate) fn invalid_method(ctx: &mut Ctx, header: &MessageHeader) -> anyhow::Result<()> {
    ctx.post_error(
        header.object_id,
        WL_DISPLAY_ERROR_INVALID_METHOD,
        "Invalid method",
    );
    anyhow::bail!(
        "Invalid method {} on object {}",
        header.opcode,
        header.object_id
    );
}

pub trait WlDisplay {
    fn sync(&mut self, ctx: &mut Ctx, object_id: ObjectId, params: &WlDisplaySync)
    -> anyhow::Result<()>;

    fn get_registry(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &WlDisplayGetRegistry,
    ) -> anyhow::Result<()>;

    fn handle_request(
        &mut self,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()> {
        match header.opcode {
            0 => {
                let params =
                    WlDisplaySync::decode(data).map_err(|err| ctx.invalid_arguments(header, err))?;
                self.sync(ctx, header.object_id, &params)
            }
            1 => {
                let params = WlDisplayGetRegistry::decode(data)
                    .map_err(|err| ctx.invalid_arguments(header, err))?;
                self.get_registry(ctx, header.object_id, &params)
            }
            _ => invalid_method(ctx, header),
        }
    }
}

#[derive(Debug)]
pub struct WlDisplaySync {
    pub callback: ObjectId,
}

impl WlDisplaySync {
    fn decode(data: &[u8]) -> Result<Self, ArgumentError> {
        let mut args = Arguments::new(data);
        let callback = args.new_id()?;
        args.finish()?;
        Ok(Self { callback })
    }
}

#[derive(Debug)]
pub struct WlDisplayGetRegistry {
    pub registry: ObjectId,
}

impl WlDisplayGetRegistry {
    fn decode(data: &[u8]) -> Result<Self, ArgumentError> {
        let mut args = Arguments::new(data);
        let registry = args.new_id()?;
        args.finish()?;
        Ok(Self { registry })
    }
}

pub trait WlRegistry {
    fn bind(&mut self, ctx: &mut Ctx, object_id: ObjectId, params: &WlRegistryBind<'_>)
    -> anyhow::Result<()>;

    fn handle_request(
        &mut self,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()> {
        match header.opcode {
            0 => {
                let params =
                    WlRegistryBind::decode(data).map_err(|err| ctx.invalid_arguments(header, err))?;
                self.bind(ctx, header.object_id, &params)
            }
            _ => invalid_method(ctx, header),
        }
    }
}

/// `bind` carries an untyped new_id, which is sent as interface name, version and id
#[derive(Debug)]
pub struct WlRegistryBind<'data> {
    pub name: u32,
    pub interface: &'data str,
    pub version: u32,
    pub id: ObjectId,
}

impl<'data> WlRegistryBind<'data> {
    fn decode(data: &'data [u8]) -> Result<Self, ArgumentError> {
        let mut args = Arguments::new(data);
        let name = args.uint()?;
        let interface = args.string()?;
        let version = args.uint()?;
        let id = args.new_id()?;
        args.finish()?;
        Ok(Self {
            name,
            interface,
            version,
            id,
        })
    }
}

pub trait WlCompositor {
    fn create_surface(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &WlCompositorCreateSurface,
    ) -> anyhow::Result<()>;

    fn create_region(
        &mut self,
        ctx: &mut Ctx,
        object_id: ObjectId,
        params: &WlCompositorCreateRegion,
    ) -> anyhow::Result<()>;

    fn handle_request(
        &mut self,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()> {
        match header.opcode {
            0 => {
                let params = WlCompositorCreateSurface::decode(data)
                    .map_err(|err| ctx.invalid_arguments(header, err))?;
                self.create_surface(ctx, header.object_id, &params)
            }
            1 => {
                let params = WlCompositorCreateRegion::decode(data)
                    .map_err(|err| ctx.invalid_arguments(header, err))?;
                self.create_region(ctx, header.object_id, &params)
            }
            _ => invalid_method(ctx, header),
        }
    }
}

#[derive(Debug)]
pub struct WlCompositorCreateSurface {
    pub id: ObjectId,
}

impl WlCompositorCreateSurface {
    fn decode(data: &[u8]) -> Result<Self, ArgumentError> {
        let mut args = Arguments::new(data);
        let id = args.new_id()?;
        args.finish()?;
        Ok(Self { id })
    }
}

#[derive(Debug)]
pub struct WlCompositorCreateRegion {
    pub id: ObjectId,
}

impl WlCompositorCreateRegion {
    fn decode(data: &[u8]) -> Result<Self, ArgumentError> {
        let mut args = Arguments::new(data);
        let id = args.new_id()?;
        args.finish()?;
        Ok(Self { id })
    }
}

pub trait WlSurface {
    fn destroy(&mut self, ctx: &mut Ctx, object_id: ObjectId, params: &WlSurfaceDestroy)
    -> anyhow::Result<()>;

    fn handle_request(
        &mut self,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()> {
        match header.opcode {
            0 => {
                let params = WlSurfaceDestroy::decode(data)
                    .map_err(|err| ctx.invalid_arguments(header, err))?;
                self.destroy(ctx, header.object_id, &params)
            }
            // No buffers are composited, so the remaining surface state is not tracked
            1..=WL_SURFACE_MAX_OPCODE => {
                debug!(
                    "Ignoring wl_surface request {} on object {} from client {}",
                    header.opcode, header.object_id, ctx.client_id
                );
                Ok(())
            }
            _ => invalid_method(ctx, header),
        }
    }
}

#[derive(Debug)]
pub struct WlSurfaceDestroy;

impl WlSurfaceDestroy {
    fn decode(data: &[u8]) -> Result<Self, ArgumentError> {
        Arguments::new(data).finish()?;
        Ok(Self)
    }
}

pub trait WlRegion {
    fn destroy(&mut self, ctx: &mut Ctx, object_id: ObjectId, params: &WlRegionDestroy)
    -> anyhow::Result<()>;

    fn handle_request(
        &mut self,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()> {
        match header.opcode {
            0 => {
                let params = WlRegionDestroy::decode(data)
                    .map_err(|err| ctx.invalid_arguments(header, err))?;
                self.destroy(ctx, header.object_id, &params)
            }
            1..=WL_REGION_MAX_OPCODE => {
                debug!(
                    "Ignoring wl_region request {} on object {} from client {}",
                    header.opcode, header.object_id, ctx.client_id
                );
                Ok(())
            }
            _ => invalid_method(ctx, header),
        }
    }
}

#[derive(Debug)]
pub struct WlRegionDestroy;

impl WlRegionDestroy {
    fn decode(data: &[u8]) -> Result<Self, ArgumentError> {
        Arguments::new(data).finish()?;
        Ok(Self)
    }
}

impl Writer {
    pub fn wl_display_error(&mut self, object_id: ObjectId) -> WlDisplayErrorObjectId<'_> {
        self.start_message(object_id, 0);
        WlDisplayErrorObjectId { writer: self }
    }

    pub fn wl_display_delete_id(&mut self, object_id: ObjectId) -> WlDisplayDeleteIdId<'_> {
        self.start_message(object_id, 1);
        WlDisplayDeleteIdId { writer: self }
    }

    pub fn wl_registry_global(&mut self, object_id: ObjectId) -> WlRegistryGlobalName<'_> {
        self.start_message(object_id, 0);
        WlRegistryGlobalName { writer: self }
    }

    pub fn wl_callback_done(&mut self, object_id: ObjectId) -> WlCallbackDoneCallbackData<'_> {
        self.start_message(object_id, 0);
        WlCallbackDoneCallbackData { writer: self }
    }
}

pub struct WlDisplayErrorObjectId<'client> {
    writer: &'client mut Writer,
}

impl<'client> WlDisplayErrorObjectId<'client> {
    pub fn object_id(self, object_id: ObjectId) -> WlDisplayErrorCode<'client> {
        self.writer.write_u32(object_id);
        WlDisplayErrorCode {
            writer: self.writer,
        }
    }
}

pub struct WlDisplayErrorCode<'client> {
    writer: &'client mut Writer,
}

impl<'client> WlDisplayErrorCode<'client> {
    pub fn code(self, code: u32) -> WlDisplayErrorMessage<'client> {
        self.writer.write_u32(code);
        WlDisplayErrorMessage {
            writer: self.writer,
        }
    }
}

pub struct WlDisplayErrorMessage<'client> {
    writer: &'client mut Writer,
}

impl WlDisplayErrorMessage<'_> {
    pub fn message(self, message: &str) {
        self.writer.write_str(message);
        self.writer.write_message_length();
    }
}

pub struct WlDisplayDeleteIdId<'client> {
    writer: &'client mut Writer,
}

impl WlDisplayDeleteIdId<'_> {
    pub fn id(self, id: u32) {
        self.writer.write_u32(id);
        self.writer.write_message_length();
    }
}

pub struct WlRegistryGlobalName<'client> {
    writer: &'client mut Writer,
}

impl<'client> WlRegistryGlobalName<'client> {
    pub fn name(self, name: u32) -> WlRegistryGlobalInterface<'client> {
        self.writer.write_u32(name);
        WlRegistryGlobalInterface {
            writer: self.writer,
        }
    }
}

pub struct WlRegistryGlobalInterface<'client> {
    writer: &'client mut Writer,
}

impl<'client> WlRegistryGlobalInterface<'client> {
    pub fn interface(self, interface: &str) -> WlRegistryGlobalVersion<'client> {
        self.writer.write_str(interface);
        WlRegistryGlobalVersion {
            writer: self.writer,
        }
    }
}

pub struct WlRegistryGlobalVersion<'client> {
    writer: &'client mut Writer,
}

impl WlRegistryGlobalVersion<'_> {
    pub fn version(self, version: u32) {
        self.writer.write_u32(version);
        self.writer.write_message_length();
    }
}

pub struct WlCallbackDoneCallbackData<'client> {
    writer: &'client mut Writer,
}

impl WlCallbackDoneCallbackData<'_> {
    pub fn callback_data(self, callback_data: u32) {
        self.writer.write_u32(callback_data);
        self.writer.write_message_length();
    }
}
