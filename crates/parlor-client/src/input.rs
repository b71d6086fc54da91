/// One line typed at the prompt.
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Rooms,
    Join(String),
    Leave,
    Reconnect,
    Help,
    Quit,
    Say(String),
    Empty,
    Unknown(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(command) = line.strip_prefix('/') else {
            return Self::Say(line.to_string());
        };

        let (name, arg) = match command.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (command, ""),
        };
        match (name, arg) {
            ("rooms", _) => Self::Rooms,
            ("join", room) if !room.is_empty() => Self::Join(room.to_string()),
            ("leave", _) => Self::Leave,
            ("reconnect", _) => Self::Reconnect,
            ("help", _) => Self::Help,
            ("quit" | "exit", _) => Self::Quit,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

pub const HELP: &str = "\
/rooms          list rooms
/join <room>    switch to a room
/leave          close the current room
/reconnect      re-open the current room
/quit           log out and exit
anything else is sent to the current room";
