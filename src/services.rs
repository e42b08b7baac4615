//! GATT Server and SoftDevice Glue
//!
//! Registers the bridge service with the SoftDevice, turns GATT callbacks
//! into [`BleEvent`]s, and implements the library's [`Notifier`] and
//! [`LinkControl`] seams on top of the current connection.

use core::cell::RefCell;
use core::ptr;

use defmt::{debug, info};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use nrf_softdevice::ble::gatt_server::builder::ServiceBuilder;
use nrf_softdevice::ble::gatt_server::characteristic::{Attribute, Metadata, Properties};
use nrf_softdevice::ble::gatt_server::{self, NotifyValueError, RegisterError, WriteOp};
use nrf_softdevice::ble::{Connection, Uuid};
use nrf_softdevice::{raw, RawError, Softdevice};

use nrf52_uart_bridge_firmware::ble::connection::{LinkControl, LinkError};
use nrf52_uart_bridge_firmware::ble::events::{self, BleEvent, BleEventQueue, MAX_WRITE_LEN};
use nrf52_uart_bridge_firmware::ble::notifications::{Notifier, NotifyError};
use nrf52_uart_bridge_firmware::ble::service::{uuid128, Characteristic, SERVICE_UUID16};
use nrf52_uart_bridge_firmware::state::{ConnectionParams, DataLengthParams, PhyParams};

/// Events from the SoftDevice to the bridge loop
pub static EVENTS: BleEventQueue = BleEventQueue::new();

/// The connection notifications and link requests go to
pub static CONNECTION: Mutex<CriticalSectionRawMutex, RefCell<Option<Connection>>> = Mutex::new(RefCell::new(None));

/// Value and CCCD handle of one characteristic
#[derive(Debug, Clone, Copy, defmt::Format)]
pub struct CharHandles {
    pub value: u16,
    pub cccd: u16,
}

/// Handles of the whole service, indexed by [`Characteristic`]
#[derive(Debug, Clone, Copy, defmt::Format)]
pub struct ServiceHandles {
    chars: [CharHandles; 3],
}

impl ServiceHandles {
    pub fn get(&self, characteristic: Characteristic) -> CharHandles {
        self.chars[characteristic as usize]
    }

    fn find(&self, handle: u16) -> Option<(Characteristic, bool)> {
        Characteristic::ALL.into_iter().find_map(|characteristic| {
            let chars = self.get(characteristic);
            if chars.value == handle {
                Some((characteristic, false))
            } else if chars.cccd == handle {
                Some((characteristic, true))
            } else {
                None
            }
        })
    }
}

/// GATT server with the bridge service
pub struct Server {
    handles: ServiceHandles,
}

impl Server {
    pub fn new(sd: &mut Softdevice) -> Result<Self, RegisterError> {
        let mut sb = ServiceBuilder::new(sd, Uuid::new_128(&uuid128(SERVICE_UUID16).to_le_bytes()))?;

        let mut chars = [CharHandles { value: 0, cccd: 0 }; 3];
        for characteristic in Characteristic::ALL {
            chars[characteristic as usize] = add_characteristic(&mut sb, characteristic)?;
        }
        let _service = sb.build();

        let handles = ServiceHandles { chars };
        info!("GATT: bridge service registered {:?}", handles);
        Ok(Self { handles })
    }

    pub fn handles(&self) -> ServiceHandles {
        self.handles
    }
}

fn add_characteristic(sb: &mut ServiceBuilder, characteristic: Characteristic) -> Result<CharHandles, RegisterError> {
    let uuid = Uuid::new_128(&uuid128(characteristic.uuid16()).to_le_bytes());
    let props = Properties::new().write().write_without_response().notify();
    let attr = Attribute::new(&[] as &[u8]).variable_len(MAX_WRITE_LEN as u16);

    let handles = sb.add_characteristic(uuid, attr, Metadata::new(props))?.build();
    Ok(CharHandles {
        value: handles.value_handle,
        cccd: handles.cccd_handle,
    })
}

impl gatt_server::Server for Server {
    type Event = ();

    fn on_write(&self, _conn: &Connection, handle: u16, _op: WriteOp, _offset: usize, data: &[u8]) -> Option<()> {
        let Some((characteristic, is_cccd)) = self.handles.find(handle) else {
            debug!("GATT: write to unknown handle {}", handle);
            return None;
        };

        let event = if is_cccd {
            BleEvent::NotificationsChanged {
                characteristic,
                enabled: data.first().is_some_and(|v| v & 0x01 != 0),
            }
        } else {
            BleEvent::write(characteristic, data)?
        };
        events::post(&EVENTS, event);
        None
    }

    fn on_notify_tx_complete(&self, _conn: &Connection, count: u8) -> Option<()> {
        events::post(&EVENTS, BleEvent::NotifyComplete { count });
        None
    }
}

/// The bridge's handle on the BLE stack
pub struct BleStack {
    handles: Option<ServiceHandles>,
}

impl BleStack {
    /// Before the SoftDevice is up every call reports "not connected"
    pub const fn detached() -> Self {
        Self { handles: None }
    }

    pub fn attach(&mut self, handles: ServiceHandles) {
        self.handles = Some(handles);
    }

    fn conn_handle(&self) -> Option<u16> {
        CONNECTION.lock(|conn| conn.borrow().as_ref().and_then(Connection::handle))
    }
}

impl Notifier for BleStack {
    fn notify(&mut self, characteristic: Characteristic, data: &[u8]) -> Result<(), NotifyError> {
        let handles = self.handles.ok_or(NotifyError::Disconnected)?;
        CONNECTION.lock(|conn| {
            let conn = conn.borrow();
            let conn = conn.as_ref().ok_or(NotifyError::Disconnected)?;
            gatt_server::notify_value(conn, handles.get(characteristic).value, data).map_err(|e| match e {
                NotifyValueError::Disconnected => NotifyError::Disconnected,
                NotifyValueError::Raw(RawError::Resources) => NotifyError::Resources,
                NotifyValueError::Raw(_) => NotifyError::Other,
            })
        })
    }
}

fn link_result(ret: u32) -> Result<(), LinkError> {
    match ret {
        raw::NRF_SUCCESS => Ok(()),
        raw::NRF_ERROR_BUSY => Err(LinkError::Busy),
        raw::NRF_ERROR_INVALID_STATE => Err(LinkError::Busy),
        raw::BLE_ERROR_INVALID_CONN_HANDLE => Err(LinkError::NotConnected),
        _ => Err(LinkError::Rejected),
    }
}

// The SoftDevice wrapper exposes no completion events for these procedures,
// so a successful request is reported back as the new current value.
impl LinkControl for BleStack {
    fn update_conn_params(&mut self, params: &ConnectionParams) -> Result<(), LinkError> {
        let handle = self.conn_handle().ok_or(LinkError::NotConnected)?;
        let raw_params = raw::ble_gap_conn_params_t {
            min_conn_interval: params.min_conn_interval,
            max_conn_interval: params.max_conn_interval,
            slave_latency: params.slave_latency,
            conn_sup_timeout: params.conn_sup_timeout,
        };
        link_result(unsafe { raw::sd_ble_gap_conn_param_update(handle, &raw_params) })?;
        events::post(&EVENTS, BleEvent::ConnParamsUpdated(*params));
        Ok(())
    }

    fn update_phy(&mut self, phy: &PhyParams) -> Result<(), LinkError> {
        let handle = self.conn_handle().ok_or(LinkError::NotConnected)?;
        let phys = raw::ble_gap_phys_t {
            tx_phys: phy.tx_phys,
            rx_phys: phy.rx_phys,
        };
        link_result(unsafe { raw::sd_ble_gap_phy_update(handle, &phys) })?;
        events::post(&EVENTS, BleEvent::PhyUpdated(*phy));
        Ok(())
    }

    fn update_data_length(&mut self, params: &DataLengthParams) -> Result<(), LinkError> {
        let handle = self.conn_handle().ok_or(LinkError::NotConnected)?;
        let dl = raw::ble_gap_data_length_params_t {
            max_tx_octets: params.max_tx_octets,
            max_rx_octets: params.max_rx_octets,
            max_tx_time_us: raw::BLE_GAP_DATA_LENGTH_AUTO as u16,
            max_rx_time_us: raw::BLE_GAP_DATA_LENGTH_AUTO as u16,
        };
        link_result(unsafe { raw::sd_ble_gap_data_length_update(handle, &dl, ptr::null_mut()) })?;
        events::post(&EVENTS, BleEvent::DataLengthUpdated(*params));
        Ok(())
    }
}
