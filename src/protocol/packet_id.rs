//! Packet IDs of the states this crate speaks, named after their
//! direction: `serverbound` packets are sent by the client.

pub mod handshake {
    pub mod serverbound {
        pub const HANDSHAKE: i32 = 0x00;
    }
}

pub mod login {
    pub mod clientbound {
        pub const DISCONNECT: i32 = 0x00;
        pub const ENCRYPTION_REQUEST: i32 = 0x01;
        pub const LOGIN_SUCCESS: i32 = 0x02;
        pub const SET_COMPRESSION: i32 = 0x03;
        pub const LOGIN_PLUGIN_REQUEST: i32 = 0x04;
    }

    pub mod serverbound {
        pub const LOGIN_START: i32 = 0x00;
        pub const ENCRYPTION_RESPONSE: i32 = 0x01;
    }
}
