use std::{collections::HashMap, fmt};

use swatch_wayland_protocol::{ClientId, ObjectId};

/// Identity of a surface. Unlike the object id chosen by the client, it is never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

impl fmt::Display for SurfaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "surface#{}", self.0)
    }
}

/// Looks up the surface a client refers to by object id
pub trait SurfaceResolver {
    fn resolve_surface(&self, client_id: ClientId, object_id: ObjectId) -> Option<SurfaceId>;
}

#[derive(Debug, Default)]
pub struct SurfaceManager {
    surfaces: HashMap<(ClientId, ObjectId), Surface>,
    next_surface_id: u64,
}

impl SurfaceManager {
    pub fn create_surface(&mut self, client_id: ClientId, object_id: ObjectId) -> SurfaceId {
        let id = SurfaceId(self.next_surface_id);
        self.next_surface_id += 1;
        self.surfaces.insert((client_id, object_id), Surface { id });
        id
    }

    /// Removes the surface and returns its identity, so that dependent state can be invalidated
    pub fn destroy_surface(
        &mut self,
        client_id: ClientId,
        object_id: ObjectId,
    ) -> Option<SurfaceId> {
        self.surfaces
            .remove(&(client_id, object_id))
            .map(|surface| surface.id)
    }

    /// Removes all surfaces of a disconnected client
    pub fn destroy_client_surfaces(&mut self, client_id: ClientId) -> Vec<SurfaceId> {
        let mut destroyed = Vec::new();
        self.surfaces.retain(|(owner, _), surface| {
            if *owner == client_id {
                destroyed.push(surface.id);
                false
            } else {
                true
            }
        });
        destroyed.sort();
        destroyed
    }

    pub fn len(&self) -> usize {
        self.surfaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.surfaces.is_empty()
    }
}

impl SurfaceResolver for SurfaceManager {
    fn resolve_surface(&self, client_id: ClientId, object_id: ObjectId) -> Option<SurfaceId> {
        self.surfaces
            .get(&(client_id, object_id))
            .map(|surface| surface.id)
    }
}

#[derive(Debug)]
struct Surface {
    id: SurfaceId,
}
