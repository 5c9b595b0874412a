pub mod displays;
pub mod overrides;
pub mod playlist_items;
pub mod playlists;
pub mod routes;
pub mod videos;
