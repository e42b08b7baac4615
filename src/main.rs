#![no_std]
#![no_main]

use defmt::{error, info, unwrap, warn};
use defmt_rtt as _;
use embassy_executor::Spawner;
use embassy_futures::join::join3;
use embassy_futures::select::{select3, Either3};
use embassy_nrf::gpio::{Input, Level, Output, OutputDrive, Pull};
use embassy_nrf::interrupt::InterruptExt;
use embassy_nrf::{bind_interrupts, config::Config, interrupt, peripherals, uarte};
use embassy_time::{Duration, Instant, Ticker, Timer};
use nrf_softdevice::ble::{gatt_server, peripheral};
use nrf_softdevice::{raw, Config as SdConfig, Softdevice};
use panic_probe as _;

use nrf52_uart_bridge_firmware::ble::events::{self, BleEvent};
use nrf52_uart_bridge_firmware::board::{on_button, Button, ConfirmTimer, Debouncer, Led, LedPins, PinLevels, StatusLeds};
use nrf52_uart_bridge_firmware::bridge::{Bridge, PollOutcome};
use nrf52_uart_bridge_firmware::config::{BridgeConfig, MAX_ATT_MTU};
use nrf52_uart_bridge_firmware::core::intents::PendingIntents;
use nrf52_uart_bridge_firmware::state::{ConnectionParams, CONN_HANDLE_INVALID, MAX_DEVICE_NAME_LEN};

mod services;
mod uart;

use services::{BleStack, Server, CONNECTION, EVENTS};
use uart::{UartPort, DMA_CHUNK};

bind_interrupts!(struct Irqs {
    UARTE0 => uarte::InterruptHandler<peripherals::UARTE0>;
});

/// Intent flags shared with the button task
static INTENTS: PendingIntents = PendingIntents::new();

/// Bridge poll period
const POLL_PERIOD: Duration = Duration::from_micros(100);

/// Flags + complete local name
const ADV_DATA_LEN: usize = 3 + 2 + MAX_DEVICE_NAME_LEN - 1;

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("Starting nRF52 UART bridge");

    // Keep clear of the SoftDevice's reserved priorities (0, 1, 4)
    let mut nrf_config = Config::default();
    nrf_config.gpiote_interrupt_priority = interrupt::Priority::P2;
    nrf_config.time_interrupt_priority = interrupt::Priority::P2;
    let p = embassy_nrf::init(nrf_config);
    interrupt::UARTE0.set_priority(interrupt::Priority::P3);

    let config = BridgeConfig::default();

    let mut uart_config = uarte::Config::default();
    uart_config.parity = uarte::Parity::EXCLUDED;
    uart_config.baudrate = uarte::Baudrate::BAUD1M;
    let uart = uarte::Uarte::new(p.UARTE0, p.P0_02, p.P0_03, Irqs, uart_config);
    let (mut tx, mut rx) = uart.split_with_idle(p.TIMER1, p.PPI_CH0, p.PPI_CH1);

    // Active low, so Low lights them for the start-up window
    let leds = BoardLeds([
        Output::new(p.P0_20, Level::Low, OutputDrive::Standard),
        Output::new(p.P0_18, Level::Low, OutputDrive::Standard),
        Output::new(p.P0_13, Level::Low, OutputDrive::Standard),
    ]);
    let buttons = Buttons([Input::new(p.P0_26, Pull::Up), Input::new(p.P0_27, Pull::Up)]);

    let rx_loop = async {
        let mut buf = [0u8; DMA_CHUNK];
        loop {
            match rx.read_until_idle(&mut buf).await {
                Ok(n) => uart::store_received(&buf[..n]),
                Err(e) => warn!("UART: rx error {:?}", e),
            }
        }
    };

    let tx_loop = async {
        let mut buf = [0u8; DMA_CHUNK];
        loop {
            let n = uart::next_tx_chunk(&mut buf).await;
            if let Err(e) = tx.write(&buf[..n]).await {
                error!("UART: tx error {:?}", e);
            }
            uart::tx_chunk_done();
        }
    };

    let bridge_loop = async {
        let mut bridge = Bridge::new(config, &INTENTS);
        let mut leds = StatusLeds::new(leds);
        let mut serial = UartPort;
        let mut ble = BleStack::detached();
        let mut ticker = Ticker::every(POLL_PERIOD);

        // The host may rename the device before the radio comes up
        let started = Instant::now();
        while Instant::now().saturating_duration_since(started) < config.timing.startup_window {
            step(&mut bridge, &mut serial, &mut ble, &mut leds);
            ticker.next().await;
        }
        bridge.finish_startup(buttons.0[0].is_low());
        unwrap!(spawner.spawn(button_task(buttons, config.timing.debounce)));

        let sd = enable_softdevice(&bridge);
        let server = unwrap!(Server::new(sd));
        ble.attach(server.handles());
        let advertising = AdvertisingSettings::new(&bridge);
        unwrap!(spawner.spawn(softdevice_task(sd)));
        unwrap!(spawner.spawn(ble_task(sd, server, advertising)));

        loop {
            step(&mut bridge, &mut serial, &mut ble, &mut leds);
            ticker.next().await;
        }
    };

    join3(rx_loop, tx_loop, bridge_loop).await;
}

fn step(bridge: &mut Bridge<'static>, serial: &mut UartPort, ble: &mut BleStack, leds: &mut StatusLeds<BoardLeds>) {
    let now = Instant::now();
    bridge.drain_events(&EVENTS, now, ble);
    if bridge.poll(now, serial, ble) == PollOutcome::Reset {
        warn!("System reset");
        cortex_m::peripheral::SCB::sys_reset();
    }
    leds.show(bridge.indicators(now));
}

fn enable_softdevice(bridge: &Bridge) -> &'static mut Softdevice {
    let name = bridge.state().params.device_name();
    let sd_config = SdConfig {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: MAX_ATT_MTU }),
        gatts_attr_tab_size: Some(raw::ble_gatts_cfg_attr_tab_size_t {
            attr_tab_size: raw::BLE_GATTS_ATTR_TAB_SIZE_DEFAULT,
        }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 1,
            periph_role_count: 1,
            central_role_count: 0,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        // Copied by the stack, so a borrowed name is fine
        gap_device_name: Some(raw::ble_gap_cfg_device_name_t {
            p_value: name.as_ptr() as _,
            current_len: name.len() as u16,
            max_len: name.len() as u16,
            write_perm: unsafe { core::mem::zeroed() },
            _bitfield_1: raw::ble_gap_cfg_device_name_t::new_bitfield_1(raw::BLE_GATTS_VLOC_STACK as u8),
        }),
        common_vs_uuid: Some(raw::ble_common_cfg_vs_uuid_t { vs_uuid_count: 1 }),
        ..Default::default()
    };

    let sd = Softdevice::enable(&sd_config);
    info!("SoftDevice enabled");
    sd
}

/// Advertising payload and timing captured at the end of start-up
struct AdvertisingSettings {
    data: heapless::Vec<u8, ADV_DATA_LEN>,
    interval: u16,
    timeout: u16,
}

impl AdvertisingSettings {
    fn new(bridge: &Bridge) -> Self {
        let params = &bridge.state().params;
        let name = params.device_name();

        // Name always fits: MAX_DEVICE_NAME_LEN - 1 bytes at most
        let mut data = heapless::Vec::new();
        let _ = data.extend_from_slice(&[0x02, 0x01, 0x06, name.len() as u8 + 1, 0x09]);
        let _ = data.extend_from_slice(name);

        Self {
            data,
            interval: params.adv_interval,
            timeout: params.adv_timeout,
        }
    }
}

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn ble_task(sd: &'static Softdevice, server: Server, advertising: AdvertisingSettings) {
    loop {
        let config = peripheral::Config {
            interval: advertising.interval as u32,
            timeout: (advertising.timeout != 0).then_some(advertising.timeout),
            ..Default::default()
        };
        let adv = peripheral::ConnectableAdvertisement::ScannableUndirected {
            adv_data: &advertising.data,
            scan_data: &[],
        };

        events::post(&EVENTS, BleEvent::AdvertisingStarted);
        let conn = match peripheral::advertise_connectable(sd, adv, &config).await {
            Ok(conn) => conn,
            Err(peripheral::AdvertiseError::Timeout) => {
                info!("Advertising timed out");
                events::post(&EVENTS, BleEvent::AdvertisingStopped);
                return;
            }
            Err(e) => {
                error!("Advertising failed: {:?}", defmt::Debug2Format(&e));
                events::post(&EVENTS, BleEvent::AdvertisingStopped);
                Timer::after(Duration::from_secs(1)).await;
                continue;
            }
        };

        let conn_handle = conn.handle().unwrap_or(CONN_HANDLE_INVALID);
        CONNECTION.lock(|c| c.replace(Some(conn.clone())));
        events::post(
            &EVENTS,
            BleEvent::Connected {
                conn_handle,
                params: ConnectionParams::default(),
            },
        );

        let reason = gatt_server::run(&conn, &server, |_| {}).await;
        info!("Connection closed: {:?}", defmt::Debug2Format(&reason));

        CONNECTION.lock(|c| c.replace(None));
        events::post(&EVENTS, BleEvent::Disconnected { conn_handle, reason: 0 });
    }
}

#[embassy_executor::task]
async fn button_task(mut buttons: Buttons, debounce: Duration) {
    let debouncer = Debouncer::new(debounce);
    let mut timer = DeadlineTimer::default();

    loop {
        let deadline = timer.deadline.unwrap_or(Instant::MAX);
        let [one, two] = &mut buttons.0;
        let event = select3(one.wait_for_any_edge(), two.wait_for_any_edge(), Timer::at(deadline)).await;

        match event {
            Either3::First(()) => debouncer.on_edge(0, buttons.0[0].is_high(), &mut timer),
            Either3::Second(()) => debouncer.on_edge(1, buttons.0[1].is_high(), &mut timer),
            Either3::Third(()) => {
                timer.deadline = None;
                debouncer.on_timer(&buttons, |pin, pressed| {
                    let button = if pin == 0 { Button::One } else { Button::Two };
                    on_button(&INTENTS, button, pressed);
                });
            }
        }
    }
}

/// Buttons 1 and 2, active low with pull-ups
struct Buttons([Input<'static>; 2]);

impl PinLevels for Buttons {
    fn is_high(&self, pin: u8) -> bool {
        self.0.get(pin as usize).is_some_and(|input| input.is_high())
    }
}

/// Confirmation timer as a deadline raced against the button edges
#[derive(Default)]
struct DeadlineTimer {
    deadline: Option<Instant>,
}

impl ConfirmTimer for DeadlineTimer {
    fn stop(&mut self) {
        self.deadline = None;
    }

    fn start(&mut self, delay: Duration) {
        self.deadline = Some(Instant::now() + delay);
    }
}

/// BLE activity, link and serial activity LEDs, active low
struct BoardLeds([Output<'static>; 3]);

impl LedPins for BoardLeds {
    fn set(&mut self, led: Led, on: bool) {
        let pin = &mut self.0[led as usize];
        if on {
            pin.set_low();
        } else {
            pin.set_high();
        }
    }
}
