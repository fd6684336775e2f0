//! V4L2 parameter access using the v4l crate.
//!
//! Controls are exposed under CamelCase names derived from their V4L2 names
//! (`Test Pattern` becomes `TestPattern`). Menu controls are enumeration
//! nodes, button controls are commands. `Width`, `Height`, `PixelFormat` and
//! `PayloadSize` map onto the capture format, and `TLParamsLocked` is held by
//! the node map itself.

use v4l::control::{self, Control, Description, MenuItem, Value};
use v4l::video::Capture;
use v4l::{Device, FourCC};

use crate::error::{CameraError, Result};
use crate::traits::{nodes, AccessStatus, DeviceInfo, EntryInfo, NodeMap, PixelFormat};

/// Node map over a V4L2 capture device.
pub struct V4l2NodeMap {
    device: Device,
    info: DeviceInfo,
    controls: Vec<(String, Description)>,
    params_locked: bool,
}

impl V4l2NodeMap {
    /// Open a V4L2 device by index (e.g., 0 for /dev/video0).
    pub fn open(index: usize) -> Result<Self> {
        let device = Device::new(index).map_err(|err| CameraError::Device(err.to_string()))?;

        let caps = device
            .query_caps()
            .map_err(|err| CameraError::Device(err.to_string()))?;
        let info = DeviceInfo {
            model_name: caps.card,
            serial_number: caps.bus,
            interface: caps.driver,
        };

        let controls = device
            .query_controls()
            .map_err(|err| CameraError::Device(err.to_string()))?
            .into_iter()
            .filter(|desc| !matches!(desc.typ, control::Type::CtrlClass))
            .map(|desc| (node_name(&desc.name), desc))
            .collect();

        Ok(Self {
            device,
            info,
            controls,
            params_locked: false,
        })
    }

    /// Device identification taken from the driver capabilities.
    pub const fn info(&self) -> &DeviceInfo {
        &self.info
    }

    /// Every node name this map answers to.
    pub fn node_names(&self) -> Vec<String> {
        [
            nodes::WIDTH,
            nodes::HEIGHT,
            nodes::PIXEL_FORMAT,
            nodes::PAYLOAD_SIZE,
            nodes::TL_PARAMS_LOCKED,
        ]
        .into_iter()
        .map(str::to_owned)
        .chain(self.controls.iter().map(|(name, _)| name.clone()))
        .collect()
    }

    fn control(&self, name: &str) -> Result<&Description> {
        self.controls
            .iter()
            .find(|(node, _)| node == name)
            .map(|(_, desc)| desc)
            .ok_or_else(|| CameraError::NodeNotFound(name.to_owned()))
    }

    fn menu_items<'a>(name: &str, desc: &'a Description) -> Result<&'a [(u32, MenuItem)]> {
        match desc.typ {
            control::Type::Menu | control::Type::IntegerMenu => {
                Ok(desc.items.as_deref().unwrap_or_default())
            }
            _ => Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "not an enumeration".to_owned(),
            }),
        }
    }

    fn format(&self) -> Result<v4l::Format> {
        self.device
            .format()
            .map_err(|err| CameraError::Device(err.to_string()))
    }

    fn update_format<F>(&mut self, name: &str, apply: F) -> Result<()>
    where
        F: FnOnce(&mut v4l::Format),
    {
        if self.params_locked {
            return Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "parameters are locked".to_owned(),
            });
        }
        let mut fmt = self.format()?;
        apply(&mut fmt);
        self.device
            .set_format(&fmt)
            .map_err(|err| CameraError::Device(err.to_string()))?;
        Ok(())
    }

    fn read_control(&self, name: &str) -> Result<i64> {
        let desc = self.control(name)?;
        let ctrl = self
            .device
            .control(desc.id)
            .map_err(|err| CameraError::Device(err.to_string()))?;
        match ctrl.value {
            Value::Integer(value) => Ok(value),
            Value::Boolean(value) => Ok(i64::from(value)),
            _ => Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "value is not an integer".to_owned(),
            }),
        }
    }

    fn write_control(&mut self, name: &str, value: i64) -> Result<()> {
        let desc = self.control(name)?;
        if desc.flags.contains(control::Flags::READ_ONLY) {
            return Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "read-only".to_owned(),
            });
        }
        let value = match desc.typ {
            control::Type::Boolean => Value::Boolean(value != 0),
            _ => Value::Integer(value),
        };
        let id = desc.id;
        self.device
            .set_control(Control { id, value })
            .map_err(|err| CameraError::Device(err.to_string()))
    }
}

impl NodeMap for V4l2NodeMap {
    fn get(&self, name: &str) -> Result<i64> {
        match name {
            nodes::WIDTH => Ok(i64::from(self.format()?.width)),
            nodes::HEIGHT => Ok(i64::from(self.format()?.height)),
            nodes::PAYLOAD_SIZE => Ok(i64::from(self.format()?.size)),
            nodes::TL_PARAMS_LOCKED => Ok(i64::from(self.params_locked)),
            _ => self.read_control(name),
        }
    }

    fn set(&mut self, name: &str, value: i64) -> Result<()> {
        let dimension = || {
            u32::try_from(value).map_err(|_| CameraError::NodeAccess {
                node: name.to_owned(),
                reason: format!("{value} is out of range"),
            })
        };
        match name {
            nodes::WIDTH => {
                let width = dimension()?;
                self.update_format(name, |fmt| fmt.width = width)
            }
            nodes::HEIGHT => {
                let height = dimension()?;
                self.update_format(name, |fmt| fmt.height = height)
            }
            nodes::TL_PARAMS_LOCKED => {
                self.params_locked = value != 0;
                Ok(())
            }
            nodes::PAYLOAD_SIZE => Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "read-only".to_owned(),
            }),
            _ => self.write_control(name, value),
        }
    }

    fn select_entry(&mut self, name: &str, symbolic: &str) -> Result<()> {
        if name == nodes::PIXEL_FORMAT {
            let format: PixelFormat = symbolic.parse().map_err(|_| CameraError::EntryNotFound {
                node: name.to_owned(),
                entry: symbolic.to_owned(),
            })?;
            return self.update_format(name, |fmt| fmt.fourcc = FourCC::new(&format.fourcc()));
        }

        let desc = self.control(name)?;
        let index = Self::menu_items(name, desc)?
            .iter()
            .find(|(_, item)| entry_name(item) == symbolic)
            .map(|(index, _)| *index)
            .ok_or_else(|| CameraError::EntryNotFound {
                node: name.to_owned(),
                entry: symbolic.to_owned(),
            })?;
        self.write_control(name, i64::from(index))
    }

    fn current_entry(&self, name: &str) -> Result<String> {
        if name == nodes::PIXEL_FORMAT {
            let fourcc = self.format()?.fourcc;
            return Ok(PixelFormat::from_fourcc(fourcc.repr).map_or_else(
                || String::from_utf8_lossy(&fourcc.repr).trim_end().to_owned(),
                |format| format.name().to_owned(),
            ));
        }

        let desc = self.control(name)?;
        let items = Self::menu_items(name, desc)?;
        let value = self.read_control(name)?;
        items
            .iter()
            .find(|(index, _)| i64::from(*index) == value)
            .map(|(_, item)| entry_name(item))
            .ok_or_else(|| CameraError::NodeAccess {
                node: name.to_owned(),
                reason: format!("value {value} has no menu entry"),
            })
    }

    fn list_entries(&self, name: &str) -> Result<Vec<EntryInfo>> {
        if name == nodes::PIXEL_FORMAT {
            let formats = self
                .device
                .enum_formats()
                .map_err(|err| CameraError::Device(err.to_string()))?;
            return Ok(formats
                .iter()
                .filter_map(|desc| {
                    PixelFormat::from_fourcc(desc.fourcc.repr)
                        .map(|format| EntryInfo::new(format.name(), i64::from(desc.index)))
                })
                .collect());
        }

        let desc = self.control(name)?;
        let access = if desc
            .flags
            .intersects(control::Flags::INACTIVE | control::Flags::DISABLED)
        {
            AccessStatus::NotAvailable
        } else if desc.flags.contains(control::Flags::READ_ONLY) {
            AccessStatus::ReadOnly
        } else {
            AccessStatus::ReadWrite
        };
        Ok(Self::menu_items(name, desc)?
            .iter()
            .map(|(index, item)| {
                EntryInfo::new(&entry_name(item), i64::from(*index)).with_access(access)
            })
            .collect())
    }

    fn execute(&mut self, name: &str) -> Result<()> {
        let desc = self.control(name)?;
        if !matches!(desc.typ, control::Type::Button) {
            return Err(CameraError::NodeAccess {
                node: name.to_owned(),
                reason: "not a command".to_owned(),
            });
        }
        let id = desc.id;
        self.device
            .set_control(Control {
                id,
                value: Value::Integer(1),
            })
            .map_err(|err| CameraError::Device(err.to_string()))
    }

    fn wait_until_done(&mut self, name: &str) -> Result<()> {
        // Button controls complete synchronously
        self.control(name).map(|_| ())
    }
}

/// Node name for a V4L2 control or menu label.
fn node_name(label: &str) -> String {
    label
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|word| !word.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            chars.next().map_or_else(String::new, |first| {
                first.to_ascii_uppercase().to_string() + chars.as_str()
            })
        })
        .collect()
}

fn entry_name(item: &MenuItem) -> String {
    match item {
        MenuItem::Name(label) => node_name(label),
        MenuItem::Value(value) => value.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_name() {
        assert_eq!(node_name("Test Pattern"), "TestPattern");
        assert_eq!(node_name("75% Colorbar"), "75Colorbar");
        assert_eq!(node_name("white_balance_temperature"), "WhiteBalanceTemperature");
        assert_eq!(node_name("Gray Ramp"), "GrayRamp");
        assert_eq!(node_name(""), "");
    }

    #[test]
    fn test_entry_name() {
        assert_eq!(entry_name(&MenuItem::Name("Solid Black".to_owned())), "SolidBlack");
        assert_eq!(entry_name(&MenuItem::Value(-3)), "-3");
    }
}
