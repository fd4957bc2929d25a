//! Random identifiers handed out by the registry.

const ALPHABET: [char; 62] = [
    'A', 'B', 'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U', 'V',
    'W', 'X', 'Y', 'Z', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i', 'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r',
    's', 't', 'u', 'v', 'w', 'x', 'y', 'z', '0', '1', '2', '3', '4', '5', '6', '7', '8', '9',
];

pub const LOBBY_CODE_LEN: usize = 7;
pub const USER_ID_LEN:    usize = 9;

/// Short code shown to people and used in URLs.
pub fn lobby_code() -> String {
    nanoid::nanoid!(LOBBY_CODE_LEN, &ALPHABET)
}

pub fn user_id() -> String {
    nanoid::nanoid!(USER_ID_LEN, &ALPHABET)
}

/// Opaque cookie value.
pub fn session_token() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}
