pub mod server_decoration_palette;
pub mod wayland;

pub use server_decoration_palette::{
    OrgKdeKwinServerDecorationPalette, OrgKdeKwinServerDecorationPaletteManager,
};
pub use wayland::{WlCompositor, WlDisplay, WlRegion, WlRegistry, WlSurface};

/// Supertrait combining all interfaces with requests of the core protocol
pub trait WaylandProtocol: WlDisplay + WlRegistry + WlCompositor + WlSurface + WlRegion {}

/// Supertrait combining all interfaces of the server decoration palette protocol
pub trait ServerDecorationPaletteProtocol:
    OrgKdeKwinServerDecorationPaletteManager + OrgKdeKwinServerDecorationPalette
{
}
