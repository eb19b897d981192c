use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, mpsc},
};

use anyhow::Context;
use log::{debug, error, info, warn};
use mio::{Interest, Poll, Token};
use swatch_shared::{DisplayMessage, GlobalArgs, MESSAGE_CHANNEL_TOKEN};
use swatch_wayland_protocol::{
    ClientConnection, ClientId, ClientStatus, Wayland, registry::InterfaceIndex,
};

mod palette;
mod protocols;
mod surface;

pub use palette::{Palette, PaletteError, PaletteKey, PaletteManager, PaletteTransport};
pub use surface::{SurfaceId, SurfaceManager, SurfaceResolver};

pub const WAYLAND_SOCKET_TOKEN: Token = Token(MESSAGE_CHANNEL_TOKEN.0 + 1);
pub const CLIENT_TOKEN_START: Token = Token(WAYLAND_SOCKET_TOKEN.0 + 1);

pub type GlobalId = u32;

pub struct DisplayState {
    event_loop: Poll,
    channel: mpsc::Receiver<DisplayMessage>,
    shutting_down: bool,
    args: Arc<GlobalArgs>,
    globals: Globals,
    surface_manager: SurfaceManager,
    palette_manager: PaletteManager,
}

impl DisplayState {
    pub fn new(
        event_loop: Poll,
        channel: mpsc::Receiver<DisplayMessage>,
        args: Arc<GlobalArgs>,
    ) -> Self {
        Self {
            event_loop,
            channel,
            shutting_down: false,
            args,
            globals: Globals::default(),
            surface_manager: SurfaceManager::default(),
            palette_manager: PaletteManager::new(),
        }
    }

    /// The palettes declared by all connected clients. Observers interested in palette changes
    /// register here.
    pub fn palette_manager(&self) -> &PaletteManager {
        &self.palette_manager
    }

    pub fn palette_manager_mut(&mut self) -> &mut PaletteManager {
        &mut self.palette_manager
    }

    pub fn surface_manager(&self) -> &SurfaceManager {
        &self.surface_manager
    }

    fn handle_message(&mut self, message: DisplayMessage) -> anyhow::Result<()> {
        match message {
            DisplayMessage::Shutdown => {
                self.shutting_down = true;
            }
        }

        Ok(())
    }

    /// Runs the display until a shutdown message is received
    pub fn run(&mut self) -> anyhow::Result<()> {
        let mut wayland = self.create_wayland_display()?;
        info!(
            "Created wayland display socket at: {}",
            wayland.socket_path()
        );
        self.event_loop
            .registry()
            .register(&mut wayland, WAYLAND_SOCKET_TOKEN, Interest::READABLE)
            .context("Unable to listen on wayland display socket")?;

        let mut connected_clients = HashMap::<ClientId, ClientConnection>::new();
        let mut events = mio::Events::with_capacity(128);
        loop {
            if let Err(err) = self.event_loop.poll(&mut events, None) {
                if err.kind() != std::io::ErrorKind::Interrupted {
                    error!("Unable to poll event loop: {err}");
                }
            }

            for event in events.iter() {
                match event.token() {
                    MESSAGE_CHANNEL_TOKEN => {
                        while let Ok(msg) = self.channel.try_recv() {
                            if let Err(err) = self.handle_message(msg) {
                                error!("Unable to handle message: {err}");
                            }
                        }
                    }
                    WAYLAND_SOCKET_TOKEN => {
                        while let Some(mut client) = wayland.next_client() {
                            let client_id = client.client_id();
                            info!("New client connected with id {}", client_id);
                            if let Err(err) = self.event_loop.registry().register(
                                &mut client,
                                Token(CLIENT_TOKEN_START.0 + client_id as usize),
                                Interest::READABLE | Interest::WRITABLE,
                            ) {
                                error!(
                                    "Unable to listen on client socket with client id {}: {err}",
                                    client_id
                                );
                            } else {
                                connected_clients.insert(client_id, client);
                            }
                        }
                    }
                    token => {
                        let client_id: ClientId = (token.0 - CLIENT_TOKEN_START.0) as ClientId;
                        let Some(client) = connected_clients.get_mut(&client_id) else {
                            debug!("Received event for unknown client {}", client_id);
                            continue;
                        };
                        let status = match client.handle_messages(self) {
                            Ok(status) => status,
                            Err(err) => {
                                error!(
                                    "Unable to handle messages for client {}: {err:#}",
                                    client_id
                                );
                                // Deliver the protocol error before closing the connection
                                if let Err(err) = client.flush() {
                                    debug!("Unable to flush client {}: {err}", client_id);
                                }
                                ClientStatus::Disconnected
                            }
                        };
                        if status == ClientStatus::Disconnected {
                            self.disconnect_client(&mut connected_clients, client_id);
                        }
                    }
                }
            }

            for (client_id, client) in connected_clients.iter_mut() {
                if let Err(err) = client.flush() {
                    warn!("Unable to flush client {}: {err}", client_id);
                }
            }

            if self.shutting_down {
                info!("Shutting down display");
                break;
            }
        }

        for client_id in connected_clients.keys().copied().collect::<Vec<_>>() {
            self.disconnect_client(&mut connected_clients, client_id);
        }

        Ok(())
    }

    fn disconnect_client(
        &mut self,
        connected_clients: &mut HashMap<ClientId, ClientConnection>,
        client_id: ClientId,
    ) {
        if let Some(mut client) = connected_clients.remove(&client_id) {
            if let Err(err) = self.event_loop.registry().deregister(&mut client) {
                error!("Unable to deregister client {}: {err}", client_id);
            }
        }
        self.client_disconnected(client_id);
        info!("Client {} disconnected", client_id);
    }

    /// Drops all state a client owned. Palettes go first, so no palette of the client is ever
    /// bound to a surface that no longer exists.
    pub fn client_disconnected(&mut self, client_id: ClientId) {
        let palettes = self.palette_manager.destroy_client_palettes(client_id);
        let surfaces = self.surface_manager.destroy_client_surfaces(client_id);
        for surface in &surfaces {
            self.palette_manager.surface_destroyed(*surface);
        }
        debug!(
            "Removed {} palettes and {} surfaces of client {}",
            palettes,
            surfaces.len(),
            client_id
        );
    }

    fn create_wayland_display(&self) -> anyhow::Result<Wayland> {
        if let Some(socket_path) = &self.args.socket_path {
            Wayland::new(socket_path.clone())
                .context("Failed to create Wayland display at given socket path")
        } else {
            let xdg_runtime_dir = std::env::var("XDG_RUNTIME_DIR").context(
                "XDG_RUNTIME_DIR not set. Set the socket path manually using --socket-path",
            )?;
            for i in 0..10 {
                let socket_path = format!("{xdg_runtime_dir}/wayland-{i}");
                if std::path::Path::new(&socket_path).exists() {
                    // Another compositor may be listening there
                    continue;
                }
                if let Ok(wayland) = Wayland::new(socket_path) {
                    return Ok(wayland);
                }
            }
            anyhow::bail!("Failed to create Wayland display");
        }
    }
}

#[derive(Debug)]
struct Globals {
    globals: BTreeMap<GlobalId, Global>,
    next_id: GlobalId,
}

#[derive(Debug)]
struct Global {
    interface_index: InterfaceIndex,
    version: u32,
}

impl Default for Globals {
    fn default() -> Self {
        let mut globals = Self {
            globals: BTreeMap::new(),
            next_id: 1,
        };
        globals.register(InterfaceIndex::WlCompositor);
        globals.register(InterfaceIndex::OrgKdeKwinServerDecorationPaletteManager);
        globals
    }
}

impl Globals {
    fn register(&mut self, interface_index: InterfaceIndex) -> GlobalId {
        let id = self.next_id;
        self.next_id += 1;
        self.globals.insert(
            id,
            Global {
                interface_index,
                version: interface_index.interface_version(),
            },
        );
        id
    }

    fn iter(&self) -> impl Iterator<Item = (&GlobalId, &Global)> {
        self.globals.iter()
    }

    fn get(&self, id: GlobalId) -> Option<&Global> {
        self.globals.get(&id)
    }
}

#[cfg(test)]
mod tests {
    use std::{
        cell::RefCell,
        io::{self, Read, Write},
        os::unix::net::UnixStream,
        rc::Rc,
    };

    use swatch_shared::message_loop_with_channel;
    use swatch_wayland_protocol::{
        HEADER_SIZE, MessageHeader, ObjectId,
        buffer::{Arguments, Writer},
        protocols::wayland::WL_DISPLAY_ERROR_INVALID_OBJECT,
        registry::DISPLAY_OBJECT_ID,
    };

    use super::*;

    const REGISTRY: ObjectId = 2;
    const MANAGER: ObjectId = 3;
    const COMPOSITOR: ObjectId = 4;
    const SURFACE: ObjectId = 5;
    const PALETTE: ObjectId = 6;
    const REGION: ObjectId = 7;

    const COMPOSITOR_GLOBAL: GlobalId = 1;
    const MANAGER_GLOBAL: GlobalId = 2;
    const MANAGER_INTERFACE: &str = "org_kde_kwin_server_decoration_palette_manager";

    fn display_state() -> DisplayState {
        let (event_loop, channel, _sender) = message_loop_with_channel::<DisplayMessage>().unwrap();
        DisplayState::new(event_loop, channel, Arc::new(GlobalArgs::default()))
    }

    #[derive(Debug)]
    struct Event {
        object_id: ObjectId,
        opcode: u16,
        args: Vec<u8>,
    }

    /// A client on the other end of a socket pair, talking raw wire format
    struct TestClient {
        stream: UnixStream,
        connection: ClientConnection,
    }

    impl TestClient {
        fn new(client_id: ClientId) -> Self {
            let (stream, server) = UnixStream::pair().unwrap();
            stream.set_nonblocking(true).unwrap();
            Self {
                stream,
                connection: ClientConnection::new(server, client_id).unwrap(),
            }
        }

        fn client_id(&self) -> ClientId {
            self.connection.client_id()
        }

        fn send(
            &mut self,
            state: &mut DisplayState,
            object_id: ObjectId,
            opcode: u16,
            args: impl FnOnce(&mut Writer),
        ) -> anyhow::Result<ClientStatus> {
            let mut writer = Writer::new();
            writer.start_message(object_id, opcode);
            args(&mut writer);
            writer.write_message_length();
            self.stream.write_all(writer.pending()).unwrap();
            let status = self.connection.handle_messages(state);
            self.connection.flush().unwrap();
            status
        }

        fn events(&mut self) -> Vec<Event> {
            let mut data = Vec::new();
            let mut chunk = [0; 4096];
            loop {
                match self.stream.read(&mut chunk) {
                    Ok(0) => break,
                    Ok(read) => data.extend_from_slice(&chunk[..read]),
                    Err(err) if err.kind() == io::ErrorKind::WouldBlock => break,
                    Err(err) => panic!("unable to read events: {err}"),
                }
            }

            let mut events = Vec::new();
            let mut rest = data.as_slice();
            while let Some(header) = MessageHeader::read(rest) {
                let size = header.size as usize;
                events.push(Event {
                    object_id: header.object_id,
                    opcode: header.opcode,
                    args: rest[HEADER_SIZE..size].to_vec(),
                });
                rest = &rest[size..];
            }
            assert!(rest.is_empty(), "incomplete event left in stream");
            events
        }

        /// Binds the compositor and the palette manager and creates one surface
        fn setup(&mut self, state: &mut DisplayState) {
            self.send(state, DISPLAY_OBJECT_ID, 1, |w| w.write_u32(REGISTRY))
                .unwrap();
            self.bind(state, MANAGER_GLOBAL, MANAGER_INTERFACE, 1, MANAGER)
                .unwrap();
            self.bind(state, COMPOSITOR_GLOBAL, "wl_compositor", 6, COMPOSITOR)
                .unwrap();
            self.send(state, COMPOSITOR, 0, |w| w.write_u32(SURFACE))
                .unwrap();
            self.events();
        }

        fn bind(
            &mut self,
            state: &mut DisplayState,
            name: GlobalId,
            interface: &str,
            version: u32,
            id: ObjectId,
        ) -> anyhow::Result<ClientStatus> {
            self.send(state, REGISTRY, 0, |w| {
                w.write_u32(name);
                w.write_str(interface);
                w.write_u32(version);
                w.write_u32(id);
            })
        }

        fn create_palette(
            &mut self,
            state: &mut DisplayState,
            id: ObjectId,
            surface: ObjectId,
        ) -> anyhow::Result<ClientStatus> {
            self.send(state, MANAGER, 0, |w| {
                w.write_u32(id);
                w.write_u32(surface);
            })
        }

        fn set_palette(
            &mut self,
            state: &mut DisplayState,
            id: ObjectId,
            palette: &str,
        ) -> anyhow::Result<ClientStatus> {
            self.send(state, id, 0, |w| w.write_str(palette))
        }
    }

    fn surface_id(state: &DisplayState, client: &TestClient, surface: ObjectId) -> SurfaceId {
        state
            .surface_manager()
            .resolve_surface(client.client_id(), surface)
            .unwrap()
    }

    #[test]
    fn registry_announces_globals() {
        let mut state = display_state();
        let mut client = TestClient::new(1);

        client
            .send(&mut state, DISPLAY_OBJECT_ID, 1, |w| w.write_u32(REGISTRY))
            .unwrap();

        let globals: Vec<_> = client
            .events()
            .into_iter()
            .map(|event| {
                assert_eq!(event.object_id, REGISTRY);
                assert_eq!(event.opcode, 0);
                let mut args = Arguments::new(&event.args);
                let global = (
                    args.uint().unwrap(),
                    args.string().unwrap().to_string(),
                    args.uint().unwrap(),
                );
                args.finish().unwrap();
                global
            })
            .collect();
        assert_eq!(
            globals,
            vec![
                (COMPOSITOR_GLOBAL, "wl_compositor".to_string(), 6),
                (MANAGER_GLOBAL, MANAGER_INTERFACE.to_string(), 1),
            ]
        );
    }

    #[test]
    fn sync_sends_done_and_releases_callback() {
        let mut state = display_state();
        let mut client = TestClient::new(1);

        client
            .send(&mut state, DISPLAY_OBJECT_ID, 0, |w| w.write_u32(9))
            .unwrap();

        let events = client.events();
        assert_eq!(events.len(), 2);
        assert_eq!((events[0].object_id, events[0].opcode), (9, 0));
        assert_eq!((events[1].object_id, events[1].opcode), (DISPLAY_OBJECT_ID, 1));
        assert_eq!(events[1].args, 9u32.to_ne_bytes());
    }

    #[test]
    fn bind_with_unsupported_version_is_fatal() {
        let mut state = display_state();
        let mut client = TestClient::new(1);
        client
            .send(&mut state, DISPLAY_OBJECT_ID, 1, |w| w.write_u32(REGISTRY))
            .unwrap();
        client.events();

        assert!(
            client
                .bind(&mut state, MANAGER_GLOBAL, MANAGER_INTERFACE, 2, MANAGER)
                .is_err()
        );

        let events = client.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].object_id, events[0].opcode), (DISPLAY_OBJECT_ID, 0));
    }

    #[test]
    fn palette_lifecycle_over_the_wire() {
        let mut state = display_state();
        let mut client = TestClient::new(1);
        client.setup(&mut state);
        let surface = surface_id(&state, &client, SURFACE);

        let changes = Rc::new(RefCell::new(Vec::new()));
        let destroyed = Rc::new(RefCell::new(Vec::new()));
        {
            let changes = changes.clone();
            state.palette_manager_mut().on_palette_created(move |palette| {
                let changes = changes.clone();
                palette.on_palette_changed(move |_, value| {
                    changes.borrow_mut().push(value.to_string())
                });
            });
        }
        {
            let destroyed = destroyed.clone();
            state
                .palette_manager_mut()
                .on_palette_destroyed(move |palette| destroyed.borrow_mut().push(palette.key()));
        }

        client.create_palette(&mut state, PALETTE, SURFACE).unwrap();
        let palette = state.palette_manager().palette_for_surface(surface).unwrap();
        assert_eq!(palette.key(), PaletteKey::new(1, PALETTE));
        assert_eq!(palette.palette(), "");

        client.set_palette(&mut state, PALETTE, "BreezeDark").unwrap();
        client.set_palette(&mut state, PALETTE, "BreezeDark").unwrap();
        assert_eq!(
            state.palette_manager().palette_for_surface(surface).unwrap().palette(),
            "BreezeDark"
        );
        assert_eq!(*changes.borrow(), vec!["BreezeDark".to_string()]);
        assert!(client.events().is_empty());

        client.send(&mut state, PALETTE, 1, |_| {}).unwrap();
        assert!(state.palette_manager().palette_for_surface(surface).is_none());
        assert!(state.palette_manager().is_empty());
        assert_eq!(*destroyed.borrow(), vec![PaletteKey::new(1, PALETTE)]);

        let events = client.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].object_id, events[0].opcode), (DISPLAY_OBJECT_ID, 1));
        assert_eq!(events[0].args, PALETTE.to_ne_bytes());

        // The released id is unknown to the connection, so the request never reaches a palette
        assert!(client.set_palette(&mut state, PALETTE, "Oxygen").is_err());
        assert!(state.palette_manager().is_empty());
        assert!(state.palette_manager().palette_for_surface(surface).is_none());
        assert_eq!(*changes.borrow(), vec!["BreezeDark".to_string()]);

        let events = client.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].object_id, events[0].opcode), (DISPLAY_OBJECT_ID, 0));
        let mut args = Arguments::new(&events[0].args);
        assert_eq!(args.object().unwrap(), PALETTE);
        assert_eq!(args.uint().unwrap(), WL_DISPLAY_ERROR_INVALID_OBJECT);
    }

    #[test]
    fn set_palette_accepts_invalid_utf8() {
        let mut state = display_state();
        let mut client = TestClient::new(1);
        client.setup(&mut state);
        let changes = Rc::new(RefCell::new(Vec::new()));
        {
            let changes = changes.clone();
            state.palette_manager_mut().on_palette_created(move |palette| {
                let changes = changes.clone();
                palette.on_palette_changed(move |_, value| {
                    changes.borrow_mut().push(value.to_string())
                });
            });
        }
        client.create_palette(&mut state, PALETTE, SURFACE).unwrap();

        let status = client
            .send(&mut state, PALETTE, 0, |w| {
                // Length covers "ca\xE9f" and the NUL, followed by padding
                w.write_u32(5);
                for word in b"ca\xE9f\0\0\0\0".chunks(4) {
                    w.write_u32(u32::from_ne_bytes(word.try_into().unwrap()));
                }
            })
            .unwrap();

        assert_eq!(status, ClientStatus::Connected);
        assert!(client.events().is_empty());
        let palette = state
            .palette_manager()
            .palette(PaletteKey::new(1, PALETTE))
            .unwrap();
        assert_eq!(palette.palette(), "ca\u{FFFD}f");
        assert_eq!(*changes.borrow(), vec!["ca\u{FFFD}f".to_string()]);
    }

    #[test]
    fn palette_for_region_posts_invalid_surface() {
        let mut state = display_state();
        let mut client = TestClient::new(1);
        client.setup(&mut state);
        client
            .send(&mut state, COMPOSITOR, 1, |w| w.write_u32(REGION))
            .unwrap();

        assert!(client.create_palette(&mut state, PALETTE, REGION).is_err());
        assert!(state.palette_manager().is_empty());

        let events = client.events();
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].object_id, events[0].opcode), (DISPLAY_OBJECT_ID, 0));
        let mut args = Arguments::new(&events[0].args);
        assert_eq!(args.object().unwrap(), MANAGER);
        assert_eq!(args.uint().unwrap(), 0);
        assert_eq!(args.string().unwrap(), "invalid surface");
        args.finish().unwrap();
    }

    #[test]
    fn palette_outlives_its_surface() {
        let mut state = display_state();
        let mut client = TestClient::new(1);
        client.setup(&mut state);
        let surface = surface_id(&state, &client, SURFACE);
        client.create_palette(&mut state, PALETTE, SURFACE).unwrap();
        client.set_palette(&mut state, PALETTE, "Oxygen").unwrap();

        client.send(&mut state, SURFACE, 0, |_| {}).unwrap();

        assert!(state.palette_manager().palette_for_surface(surface).is_none());
        let palette = state
            .palette_manager()
            .palette(PaletteKey::new(1, PALETTE))
            .unwrap();
        assert_eq!(palette.surface(), None);
        assert_eq!(palette.palette(), "Oxygen");

        // Still addressable until the client releases it
        client.set_palette(&mut state, PALETTE, "Breeze").unwrap();
        client.send(&mut state, PALETTE, 1, |_| {}).unwrap();
        assert!(state.palette_manager().is_empty());
    }

    #[test]
    fn disconnect_drops_palettes_and_surfaces_of_that_client() {
        let mut state = display_state();
        let mut first = TestClient::new(1);
        let mut second = TestClient::new(2);
        first.setup(&mut state);
        second.setup(&mut state);
        first.create_palette(&mut state, PALETTE, SURFACE).unwrap();
        second.create_palette(&mut state, PALETTE, SURFACE).unwrap();
        let second_surface = surface_id(&state, &second, SURFACE);

        state.client_disconnected(first.client_id());

        assert_eq!(
            state
                .palette_manager()
                .palettes()
                .map(Palette::key)
                .collect::<Vec<_>>(),
            vec![PaletteKey::new(2, PALETTE)]
        );
        assert_eq!(state.surface_manager().len(), 1);
        assert!(
            state
                .palette_manager()
                .palette_for_surface(second_surface)
                .is_some()
        );
    }
}
