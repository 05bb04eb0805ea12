//! Operation catalogue.
//!
//! Names are part of the wire contract and use the clients' camelCase.

/// Operations clients invoke on the server.
pub mod client {
    pub const GET_DRAW: &str = "getDraw";
    pub const LEAVE_DRAW: &str = "leaveDraw";
    pub const SAVE_DRAW: &str = "saveDraw";
    pub const LOAD_DRAW: &str = "loadDraw";
    pub const CHAT_WITH_DRAW: &str = "chatWithDraw";
    pub const ADD_SHAPE: &str = "addShape";
    pub const REMOVE_SHAPE: &str = "removeShape";
    pub const UPDATE_SHAPE: &str = "updateShape";
    pub const MOVE_DOWN_SHAPE: &str = "moveDownShape";
    pub const MOVE_UP_SHAPE: &str = "moveUpShape";
    pub const CREATE_TABLE: &str = "createTable";
    pub const UPDATE_MY_TABLES: &str = "updateMyTables";
    pub const UPDATE_MY_SAVES: &str = "updateMySaves";
    pub const LOGOUT: &str = "logout";
    pub const LOGIN: &str = "login";
    pub const GUEST_LOGIN: &str = "guestLogin";
    pub const GET_LOGGEDIN: &str = "getLoggedin";
    pub const REGISTER: &str = "register";
}

/// Notifications the server invokes on clients.
pub mod server {
    pub const RECEIVE_DRAW: &str = "receiveDraw";
    pub const LOBBY_ERROR: &str = "lobbyError";
    pub const LOBBY_MESSAGE: &str = "lobbyMessage";
    pub const UPDATE_SHAPES: &str = "updateShapes";
    pub const RECEIVE_DRAW_CHAT: &str = "receiveDrawChat";
    pub const RECEIVE_DRAW_MESSAGE: &str = "receiveDrawMessage";
    pub const CREATE_TABLE_OK: &str = "createTableOk";
    pub const SAVE_DRAW_OK: &str = "saveDrawOk";
    pub const UPDATE_TABLES: &str = "updateTables";
    pub const UPDATE_SAVES: &str = "updateSaves";
    pub const LOGIN_OK: &str = "loginOk";
    pub const LOGIN_ERROR: &str = "loginError";
    pub const LOGOUT_OK: &str = "logoutOk";
    pub const REGISTRATION_OK: &str = "registrationOk";
    pub const REGISTRATION_ERROR: &str = "registrationError";
    pub const RECEIVE_LOGGEDIN: &str = "receiveLoggedin";
}
