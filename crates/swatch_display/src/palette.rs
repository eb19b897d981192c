//! Server side decoration palettes.
//!
//! A client binds the palette manager global once and then creates one palette object per surface
//! whose decoration should follow a color scheme. The palette value is an opaque string that is
//! interpreted by whoever draws the decoration.
//!
//! The [`PaletteManager`] owns the semantic state of every palette object, keyed by the
//! connection scoped object id. The transport owns the wire identity of the object. Destroying the
//! object on the wire always evicts the palette from the manager in the same call, so a palette is
//! never discoverable through [`PaletteManager::palette_for_surface`] after its object is gone.

use std::{collections::HashMap, fmt};

use log::{debug, warn};
use swatch_wayland_protocol::{
    ClientId, ObjectId,
    protocols::{
        server_decoration_palette::ORG_KDE_KWIN_SERVER_DECORATION_PALETTE_MANAGER_ERROR_INVALID_SURFACE,
        wayland::WL_DISPLAY_ERROR_INVALID_OBJECT,
    },
    registry::RegistryError,
};
use thiserror::Error;

use crate::surface::{SurfaceId, SurfaceResolver};

/// Identifies a palette object by the client that created it and the object id it chose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PaletteKey {
    pub client_id: ClientId,
    pub object_id: ObjectId,
}

impl PaletteKey {
    pub fn new(client_id: ClientId, object_id: ObjectId) -> Self {
        Self {
            client_id,
            object_id,
        }
    }
}

impl fmt::Display for PaletteKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "palette {} of client {}", self.object_id, self.client_id)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PaletteError {
    #[error("client {client_id} requested a palette for unknown surface {surface}")]
    InvalidSurface {
        client_id: ClientId,
        surface: ObjectId,
    },
    #[error("unable to allocate palette object {id}")]
    ResourceExhausted { id: ObjectId },
    #[error("palette object id {id} can not be used")]
    ObjectIdInUse { id: ObjectId },
}

/// The connection primitives the manager needs from the transport layer
pub trait PaletteTransport {
    /// The client that sent the request
    fn client_id(&self) -> ClientId;
    /// Makes `id` addressable as a palette object on the connection
    fn create_resource(&mut self, id: ObjectId) -> Result<(), RegistryError>;
    /// Queues a fatal protocol error for `object_id`
    fn post_error(&mut self, object_id: ObjectId, code: u32, message: &str);
    /// Queues the standard allocation failure error
    fn post_no_memory(&mut self);
}

pub type PaletteCreatedCallback = Box<dyn FnMut(&mut Palette)>;
pub type PaletteChangedCallback = Box<dyn FnMut(PaletteKey, &str)>;
pub type PaletteDestroyedCallback = Box<dyn FnMut(&Palette)>;

/// The palette one client declared for one of its surfaces
pub struct Palette {
    key: PaletteKey,
    surface: Option<SurfaceId>,
    palette: String,
    changed_observers: Vec<PaletteChangedCallback>,
}

impl fmt::Debug for Palette {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Palette")
            .field("key", &self.key)
            .field("surface", &self.surface)
            .field("palette", &self.palette)
            .field("changed_observers", &self.changed_observers.len())
            .finish()
    }
}

impl Palette {
    fn new(key: PaletteKey, surface: SurfaceId) -> Self {
        Self {
            key,
            surface: Some(surface),
            palette: String::new(),
            changed_observers: Vec::new(),
        }
    }

    pub fn key(&self) -> PaletteKey {
        self.key
    }

    /// The surface the palette was created for. `None` once that surface has been destroyed.
    pub fn surface(&self) -> Option<SurfaceId> {
        self.surface
    }

    /// The current palette value. Empty until the client sets one.
    pub fn palette(&self) -> &str {
        &self.palette
    }

    /// Stores a new palette value and notifies the observers of this palette. Setting the value
    /// that is already stored does nothing. Returns whether the value changed.
    pub fn set_palette(&mut self, palette: &str) -> bool {
        if self.palette == palette {
            return false;
        }
        self.palette.clear();
        self.palette.push_str(palette);
        debug!("{} changed to {:?}", self.key, self.palette);
        for observer in &mut self.changed_observers {
            observer(self.key, &self.palette);
        }
        true
    }

    /// Registers a callback that runs every time the palette value changes
    pub fn on_palette_changed(&mut self, callback: impl FnMut(PaletteKey, &str) + 'static) {
        self.changed_observers.push(Box::new(callback));
    }
}

/// Factory and registry of all palettes of a display
#[derive(Default)]
pub struct PaletteManager {
    palettes: HashMap<PaletteKey, Palette>,
    /// Keys of live palettes in creation order
    live: Vec<PaletteKey>,
    created_observers: Vec<PaletteCreatedCallback>,
    destroyed_observers: Vec<PaletteDestroyedCallback>,
}

impl fmt::Debug for PaletteManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PaletteManager")
            .field("palettes", &self.palettes().collect::<Vec<_>>())
            .field("created_observers", &self.created_observers.len())
            .field("destroyed_observers", &self.destroyed_observers.len())
            .finish()
    }
}

impl PaletteManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handles a `create` request received on the manager object `manager`.
    ///
    /// The surface is resolved first. If it does not exist an `invalid surface` error is posted on
    /// the manager and nothing is created. If the transport can not allocate the new object the
    /// matching protocol error is posted and nothing is created either. Otherwise the palette is
    /// registered and every created observer runs exactly once.
    pub fn create_palette(
        &mut self,
        transport: &mut impl PaletteTransport,
        resolver: &impl SurfaceResolver,
        manager: ObjectId,
        surface: ObjectId,
        id: ObjectId,
    ) -> Result<PaletteKey, PaletteError> {
        let client_id = transport.client_id();
        let Some(surface_id) = resolver.resolve_surface(client_id, surface) else {
            warn!("Palette requested by client {client_id} for non existing surface {surface}");
            transport.post_error(
                manager,
                ORG_KDE_KWIN_SERVER_DECORATION_PALETTE_MANAGER_ERROR_INVALID_SURFACE,
                "invalid surface",
            );
            return Err(PaletteError::InvalidSurface { client_id, surface });
        };

        match transport.create_resource(id) {
            Ok(()) => {}
            Err(RegistryError::Exhausted(_)) => {
                transport.post_no_memory();
                return Err(PaletteError::ResourceExhausted { id });
            }
            Err(err @ (RegistryError::ObjectIdInUse(_) | RegistryError::InvalidObjectId(_))) => {
                transport.post_error(id, WL_DISPLAY_ERROR_INVALID_OBJECT, &err.to_string());
                return Err(PaletteError::ObjectIdInUse { id });
            }
        }

        let key = PaletteKey::new(client_id, id);
        debug_assert!(!self.palettes.contains_key(&key));
        let palette = self
            .palettes
            .entry(key)
            .insert_entry(Palette::new(key, surface_id))
            .into_mut();
        self.live.push(key);
        debug!("Created {key} for {surface_id}");

        for observer in &mut self.created_observers {
            observer(palette);
        }

        Ok(key)
    }

    /// Returns the oldest live palette created for `surface`
    pub fn palette_for_surface(&self, surface: SurfaceId) -> Option<&Palette> {
        self.palettes()
            .find(|palette| palette.surface == Some(surface))
    }

    pub fn palette(&self, key: PaletteKey) -> Option<&Palette> {
        self.palettes.get(&key)
    }

    pub fn palette_mut(&mut self, key: PaletteKey) -> Option<&mut Palette> {
        self.palettes.get_mut(&key)
    }

    /// All live palettes in creation order
    pub fn palettes(&self) -> impl Iterator<Item = &Palette> {
        self.live.iter().filter_map(|key| self.palettes.get(key))
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    /// Removes the palette after its object was destroyed. The palette is unregistered before the
    /// destroyed observers run, so they can no longer find it through the manager.
    pub fn destroy_palette(&mut self, key: PaletteKey) -> Option<Palette> {
        let palette = self.palettes.remove(&key)?;
        self.live.retain(|live| *live != key);
        debug!("Destroyed {key}");
        for observer in &mut self.destroyed_observers {
            observer(&palette);
        }
        Some(palette)
    }

    /// Destroys all palettes of a disconnected client. Returns how many were destroyed.
    pub fn destroy_client_palettes(&mut self, client_id: ClientId) -> usize {
        let keys: Vec<_> = self
            .live
            .iter()
            .copied()
            .filter(|key| key.client_id == client_id)
            .collect();
        for key in &keys {
            self.destroy_palette(*key);
        }
        keys.len()
    }

    /// Detaches every palette from a destroyed surface. The palettes stay alive until the client
    /// destroys their objects, but are no longer returned for any surface.
    pub fn surface_destroyed(&mut self, surface: SurfaceId) {
        for palette in self.palettes.values_mut() {
            if palette.surface == Some(surface) {
                debug!("{} lost {surface}", palette.key);
                palette.surface = None;
            }
        }
    }

    /// Registers a callback that runs once for every palette that gets created. The callback may
    /// subscribe to changes of the new palette.
    pub fn on_palette_created(&mut self, callback: impl FnMut(&mut Palette) + 'static) {
        self.created_observers.push(Box::new(callback));
    }

    /// Registers a callback that runs once for every palette that gets destroyed
    pub fn on_palette_destroyed(&mut self, callback: impl FnMut(&Palette) + 'static) {
        self.destroyed_observers.push(Box::new(callback));
    }
}
