use std::collections::HashMap;

use thiserror::Error;

use crate::{
    MessageHeader, ObjectId,
    buffer::Writer,
    client::Ctx,
    protocols::{
        ServerDecorationPaletteProtocol, WaylandProtocol,
        server_decoration_palette::{
            OrgKdeKwinServerDecorationPalette, OrgKdeKwinServerDecorationPaletteManager,
        },
        wayland::{
            WL_DISPLAY_ERROR_INVALID_METHOD, WlCompositor, WlDisplay, WlRegion, WlRegistry,
            WlSurface,
        },
    },
};

/// The id of the `wl_display` object, which exists for every client from the start
pub const DISPLAY_OBJECT_ID: ObjectId = 1;
/// Ids starting here are allocated by the server. Clients may only allocate ids below.
const MIN_SERVER_OBJECT_ID: ObjectId = 0xFF000000;
/// Default limit for the number of objects a single client can hold
pub const MAX_OBJECTS_PER_CLIENT: usize = 1 << 16;

/// The interfaces known to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterfaceIndex {
    WlDisplay,
    WlRegistry,
    WlCallback,
    WlCompositor,
    WlSurface,
    WlRegion,
    OrgKdeKwinServerDecorationPaletteManager,
    OrgKdeKwinServerDecorationPalette,
}

impl InterfaceIndex {
    pub fn interface_name(&self) -> &'static str {
        match self {
            InterfaceIndex::WlDisplay => "wl_display",
            InterfaceIndex::WlRegistry => "wl_registry",
            InterfaceIndex::WlCallback => "wl_callback",
            InterfaceIndex::WlCompositor => "wl_compositor",
            InterfaceIndex::WlSurface => "wl_surface",
            InterfaceIndex::WlRegion => "wl_region",
            InterfaceIndex::OrgKdeKwinServerDecorationPaletteManager => {
                "org_kde_kwin_server_decoration_palette_manager"
            }
            InterfaceIndex::OrgKdeKwinServerDecorationPalette => {
                "org_kde_kwin_server_decoration_palette"
            }
        }
    }

    /// The highest version of the interface the server implements
    pub fn interface_version(&self) -> u32 {
        match self {
            InterfaceIndex::WlDisplay => 1,
            InterfaceIndex::WlRegistry => 1,
            InterfaceIndex::WlCallback => 1,
            InterfaceIndex::WlCompositor => 6,
            InterfaceIndex::WlSurface => 6,
            InterfaceIndex::WlRegion => 1,
            InterfaceIndex::OrgKdeKwinServerDecorationPaletteManager => 1,
            InterfaceIndex::OrgKdeKwinServerDecorationPalette => 1,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("object id {0} is already in use")]
    ObjectIdInUse(ObjectId),
    #[error("object id {0} is outside of the client id range")]
    InvalidObjectId(ObjectId),
    #[error("no room for object id {0}")]
    Exhausted(ObjectId),
}

/// Tracks the objects of a single client and the interface each of them implements
#[derive(Debug)]
pub struct Registry {
    objects: HashMap<ObjectId, InterfaceIndex>,
    max_objects: usize,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self::with_max_objects(MAX_OBJECTS_PER_CLIENT)
    }

    /// Creates a registry that holds at most `max_objects` objects, including the display
    pub fn with_max_objects(max_objects: usize) -> Self {
        let mut objects = HashMap::new();
        objects.insert(DISPLAY_OBJECT_ID, InterfaceIndex::WlDisplay);
        Self {
            objects,
            max_objects,
        }
    }

    pub fn interface_index(&self, object_id: ObjectId) -> Option<InterfaceIndex> {
        self.objects.get(&object_id).copied()
    }

    /// Registers an object with an id chosen by the client
    pub fn register_object(
        &mut self,
        object_id: ObjectId,
        interface_index: InterfaceIndex,
    ) -> Result<(), RegistryError> {
        if object_id == 0 || object_id >= MIN_SERVER_OBJECT_ID {
            return Err(RegistryError::InvalidObjectId(object_id));
        }
        if self.objects.contains_key(&object_id) {
            return Err(RegistryError::ObjectIdInUse(object_id));
        }
        if self.objects.len() >= self.max_objects || self.objects.try_reserve(1).is_err() {
            return Err(RegistryError::Exhausted(object_id));
        }
        self.objects.insert(object_id, interface_index);
        Ok(())
    }

    /// Removes the object and tells the client that the id can be reused
    pub fn free_object(
        &mut self,
        object_id: ObjectId,
        writer: &mut Writer,
    ) -> Option<InterfaceIndex> {
        let interface_index = self.objects.remove(&object_id)?;
        if object_id < MIN_SERVER_OBJECT_ID {
            writer.wl_display_delete_id(DISPLAY_OBJECT_ID).id(object_id);
        }
        Some(interface_index)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

pub trait RequestHandler {
    fn handle_request(
        &mut self,
        interface_index: InterfaceIndex,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()>;
}

impl<T> RequestHandler for T
where
    T: WaylandProtocol + ServerDecorationPaletteProtocol,
{
    fn handle_request(
        &mut self,
        interface_index: InterfaceIndex,
        ctx: &mut Ctx,
        header: &MessageHeader,
        data: &[u8],
    ) -> anyhow::Result<()> {
        match interface_index {
            InterfaceIndex::WlDisplay => WlDisplay::handle_request(self, ctx, header, data),
            InterfaceIndex::WlRegistry => WlRegistry::handle_request(self, ctx, header, data),
            InterfaceIndex::WlCompositor => WlCompositor::handle_request(self, ctx, header, data),
            InterfaceIndex::WlSurface => WlSurface::handle_request(self, ctx, header, data),
            InterfaceIndex::WlRegion => WlRegion::handle_request(self, ctx, header, data),
            InterfaceIndex::OrgKdeKwinServerDecorationPaletteManager => {
                OrgKdeKwinServerDecorationPaletteManager::handle_request(self, ctx, header, data)
            }
            InterfaceIndex::OrgKdeKwinServerDecorationPalette => {
                OrgKdeKwinServerDecorationPalette::handle_request(self, ctx, header, data)
            }
            InterfaceIndex::WlCallback => {
                ctx.post_error(
                    header.object_id,
                    WL_DISPLAY_ERROR_INVALID_METHOD,
                    "Invalid method",
                );
                anyhow::bail!("Invalid method");
            }
        }
    }
}
