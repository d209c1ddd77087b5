//! Common data structures.

use std::fmt::{Display, Formatter};
use std::ops::{Add, AddAssign, Div, Mul, Sub, SubAssign};

use serde::{Deserialize, Serialize};

/// A bundle of the five resource axes tracked by the simulator.
///
/// All axes are non-negative reals. Arithmetic is componentwise and total;
/// dividing by a zero axis yields zero on that axis, which keeps ratio
/// computations well-defined for machines without e.g. FPGA capacity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Resources {
    pub cpu: f64,
    pub ram: f64,
    pub disk: f64,
    pub bandwidth: f64,
    pub fpga: f64,
}

impl Resources {
    pub fn new(cpu: f64, ram: f64, disk: f64, bandwidth: f64, fpga: f64) -> Self {
        Self {
            cpu,
            ram,
            disk,
            bandwidth,
            fpga,
        }
    }

    /// Checks whether a request fits into the available resources on every axis.
    pub fn fits(request: &Resources, available: &Resources) -> bool {
        request.cpu <= available.cpu
            && request.ram <= available.ram
            && request.disk <= available.disk
            && request.bandwidth <= available.bandwidth
            && request.fpga <= available.fpga
    }

    /// Returns true if any axis exceeds the given value.
    pub fn any_axis_above(&self, threshold: f64) -> bool {
        self.cpu > threshold
            || self.ram > threshold
            || self.disk > threshold
            || self.bandwidth > threshold
            || self.fpga > threshold
    }
}

impl Display for Resources {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(
            f,
            "({}, {}, {}, {}, {})",
            self.cpu, self.ram, self.disk, self.bandwidth, self.fpga
        )
    }
}

impl Add for Resources {
    type Output = Resources;

    fn add(self, rhs: Resources) -> Resources {
        Resources {
            cpu: self.cpu + rhs.cpu,
            ram: self.ram + rhs.ram,
            disk: self.disk + rhs.disk,
            bandwidth: self.bandwidth + rhs.bandwidth,
            fpga: self.fpga + rhs.fpga,
        }
    }
}

impl Sub for Resources {
    type Output = Resources;

    fn sub(self, rhs: Resources) -> Resources {
        Resources {
            cpu: self.cpu - rhs.cpu,
            ram: self.ram - rhs.ram,
            disk: self.disk - rhs.disk,
            bandwidth: self.bandwidth - rhs.bandwidth,
            fpga: self.fpga - rhs.fpga,
        }
    }
}

impl AddAssign for Resources {
    fn add_assign(&mut self, rhs: Resources) {
        *self = *self + rhs;
    }
}

impl SubAssign for Resources {
    fn sub_assign(&mut self, rhs: Resources) {
        *self = *self - rhs;
    }
}

impl Mul<f64> for Resources {
    type Output = Resources;

    fn mul(self, factor: f64) -> Resources {
        Resources {
            cpu: self.cpu * factor,
            ram: self.ram * factor,
            disk: self.disk * factor,
            bandwidth: self.bandwidth * factor,
            fpga: self.fpga * factor,
        }
    }
}

fn ratio(num: f64, denom: f64) -> f64 {
    if denom == 0. {
        0.
    } else {
        num / denom
    }
}

impl Div for Resources {
    type Output = Resources;

    fn div(self, rhs: Resources) -> Resources {
        Resources {
            cpu: ratio(self.cpu, rhs.cpu),
            ram: ratio(self.ram, rhs.ram),
            disk: ratio(self.disk, rhs.disk),
            bandwidth: ratio(self.bandwidth, rhs.bandwidth),
            fpga: ratio(self.fpga, rhs.fpga),
        }
    }
}

impl Div<f64> for Resources {
    type Output = Resources;

    fn div(self, factor: f64) -> Resources {
        Resources {
            cpu: ratio(self.cpu, factor),
            ram: ratio(self.ram, factor),
            disk: ratio(self.disk, factor),
            bandwidth: ratio(self.bandwidth, factor),
            fpga: ratio(self.fpga, factor),
        }
    }
}

/// Per-machine capacity and usage snapshot exposed to observers.
#[derive(Clone, Copy, Debug, Serialize)]
pub struct MachineUsageInfo {
    pub machine_id: u32,
    pub used: Resources,
    pub total: Resources,
}
