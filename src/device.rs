use std::sync::mpsc::{channel, Receiver, Sender};

/// Keyboard input port (IN, blocking).
pub const KEYBOARD_PORT: u8 = 0x01;
/// Traffic-lights output port (OUT).
pub const LIGHTS_PORT: u8 = 0x02;
/// Heater port (IN reads status, OUT drives the burner).
pub const HEATER_PORT: u8 = 0x03;

/// Keyboard collaborator. `read_key` blocks until a byte is available;
/// cancellation belongs to whoever drives the execution thread.
pub trait Keyboard {
    fn read_key(&mut self) -> u8;
}

/// Traffic-lights collaborator, fed the raw lamp bits from AL.
pub trait Lights {
    fn set_lights(&mut self, bits: u8);
}

/// Heater collaborator: a status byte to read and a burner level to set.
pub trait Heater {
    fn status(&self) -> u8;
    fn set_burner(&mut self, level: u8);
}

/// Keyboard with nothing attached: every read yields NUL immediately.
pub struct NullKeyboard;

impl Keyboard for NullKeyboard {
    fn read_key(&mut self) -> u8 {
        0
    }
}

pub struct NullLights;

impl Lights for NullLights {
    fn set_lights(&mut self, _bits: u8) {}
}

pub struct NullHeater;

impl Heater for NullHeater {
    fn status(&self) -> u8 {
        0
    }

    fn set_burner(&mut self, _level: u8) {}
}

/// Keyboard backed by a synchronous channel.
///
/// The blocking port read becomes a channel receive; dropping the sender
/// abandons any outstanding read, which then yields 0 instead of faulting.
pub struct ChannelKeyboard {
    rx: Receiver<u8>,
}

impl ChannelKeyboard {
    pub fn new() -> (Sender<u8>, ChannelKeyboard) {
        let (tx, rx) = channel();
        (tx, ChannelKeyboard { rx })
    }
}

impl Keyboard for ChannelKeyboard {
    fn read_key(&mut self) -> u8 {
        self.rx.recv().unwrap_or(0)
    }
}

/// The device collaborators reachable through the I/O ports.
pub struct Devices {
    pub keyboard: Box<dyn Keyboard>,
    pub lights: Box<dyn Lights>,
    pub heater: Box<dyn Heater>,
}

impl Devices {
    /// No devices attached; reads yield 0, writes vanish.
    pub fn disconnected() -> Self {
        Devices {
            keyboard: Box::new(NullKeyboard),
            lights: Box::new(NullLights),
            heater: Box::new(NullHeater),
        }
    }
}

impl Default for Devices {
    fn default() -> Self {
        Devices::disconnected()
    }
}
