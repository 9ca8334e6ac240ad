//! Demo washing-machine control task.
//!
//! A stand-in for real trainer firmware: enables the GPIOD clock, sets pins
//! 8..=14 to output mode, chases the four LEDs, and reacts to the front-panel
//! inputs (accept starts the motor, cancel stops it, PS3 reverses, opening
//! the door reports on the console). It runs against the shared board through
//! the same address-based access path the CPU simulator would use, so
//! diagnostic sessions see genuine ODR transitions, IDR state, and console
//! traffic.
//!
//! The task idles while the board is halted and restarts its peripheral
//! setup after a reset (detected by the GPIOD clock-enable bit going away).

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use wms_core::{
    Board, GPIOD_BASE, PIN_ACCEPT, PIN_CANCEL, PIN_DIRECTION, PIN_DOOR, PIN_LATCH, PIN_LED_A,
    PIN_LED_D, PIN_MOTOR, PIN_PS3, RCC_AHB1ENR,
};

const GPIOD_MODER: u32 = GPIOD_BASE;
const GPIOD_IDR: u32 = GPIOD_BASE + 0x10;
const GPIOD_ODR: u32 = GPIOD_BASE + 0x14;

/// GPIOD clock enable in RCC AHB1ENR.
const GPIOD_CLOCK: u32 = 1 << 3;

/// Pins 8..=14 in output mode (mode bits 01 per pin).
const OUTPUT_MODES: u32 = 0x1555 << 16;

const TICK: Duration = Duration::from_millis(250);

pub fn run(board: Arc<Mutex<Board>>) {
    log::info!("firmware task started");
    let mut led = PIN_LED_A;
    let mut lit = false;
    let mut reversed = false;
    let mut door_was_open = false;

    loop {
        thread::sleep(TICK);
        let mut b = crate::lock(&board);
        if b.halted {
            continue;
        }
        if read(&mut b, RCC_AHB1ENR) & GPIOD_CLOCK == 0 {
            // power-on or post-reset state
            write(&mut b, RCC_AHB1ENR, GPIOD_CLOCK);
            write(&mut b, GPIOD_MODER, OUTPUT_MODES);
            led = PIN_LED_A;
            lit = false;
            reversed = false;
            door_was_open = false;
            b.console_write("wms firmware up");
        }

        // LED chase: light the current LED for one tick, then move on
        if lit {
            clear_bit(&mut b, GPIOD_ODR, led);
            led = if led == PIN_LED_D { PIN_LED_A } else { led + 1 };
        } else {
            set_bit(&mut b, GPIOD_ODR, led);
        }
        lit = !lit;

        let keys = read(&mut b, GPIOD_IDR);
        if keys & (1 << PIN_ACCEPT) != 0 {
            set_bit(&mut b, GPIOD_ODR, PIN_MOTOR);
            set_bit(&mut b, GPIOD_ODR, PIN_LATCH);
        }
        if keys & (1 << PIN_CANCEL) != 0 {
            clear_bit(&mut b, GPIOD_ODR, PIN_MOTOR);
            clear_bit(&mut b, GPIOD_ODR, PIN_LATCH);
        }
        if keys & (1 << PIN_PS3) != 0 {
            reversed = !reversed;
            if reversed {
                set_bit(&mut b, GPIOD_ODR, PIN_DIRECTION);
            } else {
                clear_bit(&mut b, GPIOD_ODR, PIN_DIRECTION);
            }
        }
        let door_open = keys & (1 << PIN_DOOR) != 0;
        if door_open && !door_was_open {
            b.console_write("door open");
        }
        door_was_open = door_open;
    }
}

// Register access helpers. The addresses here are compile-time constants in
// the valid peripheral window, so a resolution fault means a firmware bug;
// it is logged rather than propagated.

fn read(board: &mut Board, addr: u32) -> u32 {
    match board.read_addr(addr) {
        Ok(v) => v,
        Err(e) => {
            log::error!("firmware read {:#010x}: {}", addr, e);
            0
        }
    }
}

fn write(board: &mut Board, addr: u32, value: u32) {
    if let Err(e) = board.write_addr(addr, value) {
        log::error!("firmware write {:#010x}: {}", addr, e);
    }
}

fn set_bit(board: &mut Board, addr: u32, bit: u8) {
    let v = read(board, addr);
    write(board, addr, v | (1 << bit));
}

fn clear_bit(board: &mut Board, addr: u32, bit: u8) {
    let v = read(board, addr);
    write(board, addr, v & !(1u32 << bit));
}
