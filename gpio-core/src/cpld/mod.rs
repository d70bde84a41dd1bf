//! CPLD power-rail failure monitor.
//!
//! The CPLD exposes three power status registers and three rail data
//! registers over I2C. While the host is out of S4, a status register that
//! disagrees with its expected value counts as one power-fail strike. After
//! [`POWER_FAIL_STRIKES`] strikes, the first data register that disagrees
//! names the failed rail, which is logged once per incident.

use core::fmt;

use log::{debug, warn};

use crate::pins::mainboard::SLP_S4;
use crate::platform::{GpioAccess, SelLogger};
use crate::telemetry::{EventSink, GpioEvent};

/// I2C bus the CPLD sits on.
pub const CPLD_BUS: u8 = 6;
/// 7-bit CPLD address.
pub const CPLD_ADDRESS: u16 = 0x50;

pub const MAIN_PWR_STS_REG: u8 = 0;
pub const CPU0_PWR_STS_REG: u8 = 1;
pub const CPU1_PWR_STS_REG: u8 = 2;
pub const PWRDATA1_REG: u8 = 3;
pub const PWRDATA2_REG: u8 = 4;
pub const PWRDATA3_REG: u8 = 5;

/// Expected contents of the status registers with every rail good.
pub const STATUS_EXPECTED: [(u8, u8); 3] = [
    (MAIN_PWR_STS_REG, 0x04),
    (CPU0_PWR_STS_REG, 0x04),
    (CPU1_PWR_STS_REG, 0x04),
];
/// Expected contents of the rail data registers with every rail good.
pub const DATA_EXPECTED: [(u8, u8); 3] = [
    (PWRDATA1_REG, 0xff),
    (PWRDATA2_REG, 0xff),
    (PWRDATA3_REG, 0xc0),
];

/// Strikes tolerated before rail data is decoded.
pub const POWER_FAIL_STRIKES: u8 = 3;
/// Consecutive unavailable readings reported as skips.
pub const MAX_READ_RETRY: u8 = 10;

/// Failure on the CPLD bus.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum BusError {
    /// The bus device could not be opened or addressed.
    Unavailable,
    /// The register transfer failed.
    Transfer,
}

impl fmt::Display for BusError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BusError::Unavailable => "CPLD bus unavailable",
            BusError::Transfer => "CPLD register transfer failed",
        })
    }
}

/// Byte-wide register access to the CPLD.
pub trait CpldBus {
    fn read_register(&mut self, register: u8) -> Result<u8, BusError>;
}

/// Rail named by a rail data register value.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RailFault {
    CtnrPsOn,
    P12vMain,
    P5v,
    P3v3,
    PvppAbc,
    PvppDef,
    PvppGhj,
    PvppKlm,
    PvttCpu0,
    PvttCpu1,
    PvccioCpu0,
    PvccioCpu1,
    PvccinCpu0,
    PvccinCpu1,
    PvsaCpu0,
    PvsaCpu1,
    CpuPwrgd,
    PltRst,
    /// Value did not match any known pattern for the data register.
    Unknown { register: u8 },
}

impl RailFault {
    /// Decodes a data register value. Returns `None` for non-data registers.
    #[must_use]
    pub const fn decode(register: u8, value: u8) -> Option<Self> {
        let fault = match (register, value) {
            (PWRDATA1_REG, 0x40) => RailFault::CtnrPsOn,
            (PWRDATA1_REG, 0x00) => RailFault::P12vMain,
            (PWRDATA1_REG, 0xc0) => RailFault::P5v,
            (PWRDATA1_REG, 0xe0) => RailFault::P3v3,
            (PWRDATA1_REG, 0xf7) => RailFault::PvppAbc,
            (PWRDATA1_REG, 0xfb) => RailFault::PvppDef,
            (PWRDATA1_REG, 0xfd) => RailFault::PvppGhj,
            (PWRDATA1_REG, 0xfe) => RailFault::PvppKlm,
            (PWRDATA2_REG, 0x55) => RailFault::PvttCpu0,
            (PWRDATA2_REG, 0xaa) => RailFault::PvttCpu1,
            (PWRDATA2_REG, 0xd5) => RailFault::PvccioCpu0,
            (PWRDATA2_REG, 0xea) => RailFault::PvccioCpu1,
            (PWRDATA2_REG, 0xf7) => RailFault::PvccinCpu0,
            (PWRDATA2_REG, 0xfb) => RailFault::PvccinCpu1,
            (PWRDATA2_REG, 0xfd) => RailFault::PvsaCpu0,
            (PWRDATA2_REG, 0xfe) => RailFault::PvsaCpu1,
            (PWRDATA3_REG, 0x40) => RailFault::CpuPwrgd,
            (PWRDATA3_REG, 0x80) => RailFault::PltRst,
            (PWRDATA1_REG..=PWRDATA3_REG, _) => RailFault::Unknown { register },
            _ => return None,
        };
        Some(fault)
    }

    const fn signal(self) -> &'static str {
        match self {
            RailFault::CtnrPsOn => "FM_CTNR_PS_ON",
            RailFault::P12vMain => "PWRGD_P12V_MAIN",
            RailFault::P5v => "PWRGD_P5V",
            RailFault::P3v3 => "PWRGD_P3V3",
            RailFault::PvppAbc => "PWRGD_PVPP_ABC",
            RailFault::PvppDef => "PWRGD_PVPP_DEF",
            RailFault::PvppGhj => "PWRGD_PVPP_GHJ",
            RailFault::PvppKlm => "PWRGD_PVPP_KLM",
            RailFault::PvttCpu0 => "PWRGD_PVTT_CPU0",
            RailFault::PvttCpu1 => "PWRGD_PVTT_CPU1",
            RailFault::PvccioCpu0 => "PWRGD_PVCCIO_CPU0",
            RailFault::PvccioCpu1 => "PWRGD_PVCCIO_CPU1",
            RailFault::PvccinCpu0 => "PWRGD_PVCCIN_CPU0",
            RailFault::PvccinCpu1 => "PWRGD_PVCCIN_CPU1",
            RailFault::PvsaCpu0 => "PWRGD_PVSA_CPU0",
            RailFault::PvsaCpu1 => "PWRGD_PVSA_CPU1",
            RailFault::CpuPwrgd => "PWRGD_CPUPWRGD",
            RailFault::PltRst => "RST_PLTRST_N",
            RailFault::Unknown { .. } => "Unknown",
        }
    }
}

impl fmt::Display for RailFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RailFault::Unknown { register } => {
                let data = register.saturating_sub(PWRDATA1_REG) + 1;
                write!(f, "Unknown power rail fails(PWRDATA{data})")
            }
            other => write!(f, "{} power rail fails", other.signal()),
        }
    }
}

/// Outcome of one monitor poll.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CpldReading {
    /// `0` when healthy, otherwise `1 << register` of the failing data register.
    Value(u8),
    /// Transient failure; the caller should keep its previous reading.
    Skip,
    /// Host is off or the bus has failed repeatedly.
    NotAvailable,
}

/// State carried between polls.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct PowerFailMonitor {
    strikes: u8,
    logged: bool,
    retries: u8,
}

impl PowerFailMonitor {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            strikes: 0,
            logged: false,
            retries: 0,
        }
    }

    #[must_use]
    pub const fn strikes(&self) -> u8 {
        self.strikes
    }

    /// One poll. Unavailable readings are reported as [`CpldReading::Skip`]
    /// until [`MAX_READ_RETRY`] of them have been absorbed in a row.
    pub fn poll<B, P, S>(&mut self, bus: &mut B, platform: &P, sink: &S) -> CpldReading
    where
        B: CpldBus + ?Sized,
        P: GpioAccess + SelLogger + ?Sized,
        S: EventSink + ?Sized,
    {
        let reading = self.sample(bus, platform, sink);
        if reading == CpldReading::NotAvailable && self.retries < MAX_READ_RETRY {
            self.retries += 1;
            CpldReading::Skip
        } else {
            self.retries = 0;
            reading
        }
    }

    fn sample<B, P, S>(&mut self, bus: &mut B, platform: &P, sink: &S) -> CpldReading
    where
        B: CpldBus + ?Sized,
        P: GpioAccess + SelLogger + ?Sized,
        S: EventSink + ?Sized,
    {
        match platform.read_line(SLP_S4) {
            Ok(level) if level.is_high() => {}
            Ok(_) => {
                self.strikes = 0;
                return CpldReading::NotAvailable;
            }
            Err(err) => {
                debug!("SLP_S4 read failed: {err}");
                return CpldReading::NotAvailable;
            }
        }

        for (register, expected) in STATUS_EXPECTED {
            match bus.read_register(register) {
                Ok(value) if value == expected => {}
                Ok(_) => {
                    self.strikes = self.strikes.saturating_add(1);
                    break;
                }
                Err(err) => {
                    debug!("CPLD register {register} read failed: {err}");
                    return CpldReading::NotAvailable;
                }
            }
        }

        if self.strikes <= POWER_FAIL_STRIKES {
            self.logged = false;
            return CpldReading::Value(0);
        }

        for (register, expected) in DATA_EXPECTED {
            let value = match bus.read_register(register) {
                Ok(value) => value,
                Err(err) => {
                    debug!("CPLD register {register} read failed: {err}");
                    return CpldReading::NotAvailable;
                }
            };
            if value == expected {
                continue;
            }
            if let Some(fault) = RailFault::decode(register, value) {
                self.report(fault, platform, sink);
            }
            return CpldReading::Value(1 << register);
        }
        CpldReading::Value(0)
    }

    fn report<P, S>(&mut self, fault: RailFault, platform: &P, sink: &S)
    where
        P: SelLogger + ?Sized,
        S: EventSink + ?Sized,
    {
        if self.logged {
            return;
        }
        self.logged = true;
        sink.emit(GpioEvent::RailFailure(fault));

        let mut sel = heapless::String::<48>::new();
        let _ = fmt::write(&mut sel, format_args!("{fault}"));
        if let Err(err) = platform.add_critical_sel(&sel) {
            warn!("failed to add SEL entry '{sel}': {err}");
        }
    }
}
