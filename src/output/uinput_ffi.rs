pub const UINPUT_PATH: &str = "/dev/uinput";

// Event stuff
pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;

pub const SYN_REPORT: u16 = 0x00;

// EV_KEY values
pub const KEY_RELEASED: i32 = 0;
pub const KEY_PRESSED: i32 = 1;
pub const KEY_AUTOREPEAT: i32 = 2;

pub const BUS_USB: u16 = 0x03;

// uinput ioctl codes (for x86_64 Linux)
pub const UI_DEV_CREATE: libc::c_ulong = 0x5501;
pub const UI_DEV_DESTROY: libc::c_ulong = 0x5502;
pub const UI_SET_EVBIT: libc::c_ulong = 0x40045564;
pub const UI_SET_KEYBIT: libc::c_ulong = 0x40045565;

#[repr(C)]
pub struct InputEvent {
    pub tv_sec: libc::time_t,
    pub tv_usec: libc::suseconds_t,
    pub type_: u16,
    pub code: u16,
    pub value: i32,
}

impl InputEvent {
    pub fn new(type_: u16, code: u16, value: i32) -> Self {
        Self {
            tv_sec: 0,
            tv_usec: 0,
            type_,
            code,
            value,
        }
    }
}

#[repr(C)]
pub struct UinputUserDev {
    pub name: [u8; 80],
    pub id: InputId,
    pub ff_effects_max: u32,
    pub absmax: [i32; 64],
    pub absmin: [i32; 64],
    pub absfuzz: [i32; 64],
    pub absflat: [i32; 64],
}

#[repr(C)]
#[derive(Default)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}
