//! Minecraft Java Edition client login over an HTTP `CONNECT` proxy.
//!
//! The connection looks like this:
//! this library => HTTP proxy (CONNECT, optional Basic auth) => game server
//!
//! # Login process
//! The server address is resolved the way the vanilla client does it
//! (explicit port, else a `_minecraft._tcp` SRV record, else 25565). The
//! client then connects to the proxy and asks it to open a tunnel to that
//! address. The proxy's response head is parsed properly, so game bytes the
//! proxy forwards right behind it are not lost.
//!
//! Over the tunnel the client sends a Handshake announcing the Login state,
//! followed by Login Start. From then on it reacts to whatever the server
//! sends until the server either accepts the player (Login Success) or
//! rejects them (Disconnect). Encryption Request and Set Compression switch
//! the connection into its encrypted and compressed modes along the way.
//!
//! Every step is bounded by a timeout and can be cancelled. Failures carry
//! the [`LoginStage`] they happened in.

pub mod auth;
pub mod chat;
pub mod encryption;
mod error;
pub mod login;
pub mod protocol;
pub mod resolver;
pub mod transport;
pub mod tunnel;

pub use auth::{Auth, MojangSessionService, OfflineSession, SessionService};
pub use chat::ChatMessage;
pub use error::{LoginError, LoginFailure, LoginStage};
pub use login::{ClientSession, LoggedIn, LoginConfig, LoginOutcome, LoginTransport};
pub use resolver::{Resolve, ServerAddress, SrvResolver, StaticResolver};
pub use transport::{PacketTransport, TransportError};
pub use tunnel::{establish_tunnel, ProxyCredential, TunnelError, TunnelRequest, TunnelStream};
