//! Shared test fixtures
//!
//! A small zoo of "live" object types with schemas covering the property
//! kinds: scalars, inheritance (with a shadowed name), companions,
//! pointers and disabled caching. `#[repr(C)]` keeps a derived object
//! pointer-identical with its first base, matching how the shadow layer
//! adjusts pointers.

use std::sync::{LazyLock, Once};

use dashmap::DashSet;
use objshadow_probe::{LocalProbe, RawObject};

use crate::registry;
use crate::schema::{ClassSchema, Shadowed};

/// Installs (or returns) the global test probe.
pub fn install_probe() -> &'static LocalProbe {
    LocalProbe::global()
}

#[repr(C)]
pub struct Widget {
    pub size: i32,
    pub label: String,
}

impl Widget {
    pub fn sample() -> Self {
        Self {
            size: 4,
            label: "probe".to_owned(),
        }
    }
}

impl Shadowed for Widget {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<Widget>("Widget")
                .writable("size", |w| w.size, |w, v| w.size = v)
                .notify("sizeChanged")
                .getter("label", |w| w.label.clone())
                .computed("area", |w| i64::from(w.size) * i64::from(w.size))
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

#[repr(C)]
pub struct Gadget {
    pub widget: Widget,
    pub wireless: bool,
}

impl Gadget {
    pub fn sample() -> Self {
        Self {
            widget: Widget::sample(),
            wireless: false,
        }
    }
}

impl Shadowed for Gadget {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<Gadget>("Gadget")
                .base::<Widget>(|g| &g.widget)
                // Shadows Widget's "label" to exercise name precedence.
                .getter("label", |g| format!("gadget:{}", g.widget.label))
                .field("wireless", |g| g.wireless)
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

#[repr(C)]
pub struct SmartGadget {
    pub gadget: Gadget,
    pub firmware: u32,
}

impl SmartGadget {
    pub fn sample() -> Self {
        Self {
            gadget: Gadget::sample(),
            firmware: 1,
        }
    }
}

impl Shadowed for SmartGadget {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<SmartGadget>("SmartGadget")
                .base::<Gadget>(|s| &s.gadget)
                .field("firmware", |s| s.firmware)
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

/// Addresses known to actually be [`SmartGadget`]s, consulted by the
/// subtype caster during discovery.
static SMART_ADDRS: LazyLock<DashSet<usize>> = LazyLock::new(DashSet::new);

pub fn mark_smart(raw: RawObject) {
    SMART_ADDRS.insert(raw.addr());
}

pub fn unmark_smart(raw: RawObject) {
    SMART_ADDRS.remove(&raw.addr());
}

fn smart_caster(raw: RawObject) -> Option<RawObject> {
    SMART_ADDRS.contains(&raw.addr()).then_some(raw)
}

/// Registers Gadget -> SmartGadget discovery, once per process.
pub fn register_smart_discovery() {
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        registry::register_subtype::<Gadget, SmartGadget>(smart_caster);
    });
}

/// Pimpl-style object whose interesting state lives in a private part.
pub struct Sensor {
    private: Box<SensorPrivate>,
}

pub struct SensorPrivate {
    pub reading: f64,
    pub unit: String,
}

impl Sensor {
    pub fn sample() -> Self {
        Self {
            private: Box::new(SensorPrivate {
                reading: 2.5,
                unit: "mV".to_owned(),
            }),
        }
    }
}

impl Shadowed for Sensor {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<Sensor>("Sensor")
                .companion::<SensorPrivate>(|s| &*s.private)
                .companion_field("reading", |p: &SensorPrivate| p.reading)
                .companion_getter("unit", |p: &SensorPrivate| p.unit.clone())
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

/// Class with caching disabled: every read goes to the live object.
pub struct Ticker {
    pub count: u64,
}

impl Shadowed for Ticker {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<Ticker>("Ticker")
                .writable("count", |t| t.count, |t, v| t.count = v)
                .disable_caching()
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

/// Aggregate with one owned, one non-owned and one foreign pointer.
pub struct Rig {
    pub owned: Box<Widget>,
    pub partner: *const Widget,
    pub alien: *const Ticker,
}

impl Shadowed for Rig {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<Rig>("Rig")
                .owning("owned", |r| Some(&*r.owned))
                .non_owning("partner", |r| unsafe { r.partner.as_ref() })
                .foreign("alien", |r| unsafe { r.alien.as_ref() })
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

/// Self-referential node: its pointer property targets its own class.
pub struct Chain {
    pub next: *const Chain,
}

impl Shadowed for Chain {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<Chain>("Chain")
                .non_owning("next", |c| unsafe { c.next.as_ref() })
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

/// Diamond fixtures: [`Coupler`] inherits [`Port`] twice, once through
/// each plug. The plugs carry no properties of their own.
#[repr(C)]
pub struct Port {
    pub lanes: i32,
}

impl Shadowed for Port {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<Port>("Port")
                .field("lanes", |p| p.lanes)
                .notify("lanesChanged")
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

#[repr(C)]
pub struct InPlug {
    pub port: Port,
}

impl Shadowed for InPlug {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<InPlug>("InPlug")
                .base::<Port>(|p| &p.port)
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

#[repr(C)]
pub struct OutPlug {
    pub port: Port,
}

impl Shadowed for OutPlug {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<OutPlug>("OutPlug")
                .base::<Port>(|p| &p.port)
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}

#[repr(C)]
pub struct Coupler {
    pub input: InPlug,
    pub output: OutPlug,
}

impl Coupler {
    pub fn sample() -> Self {
        Self {
            input: InPlug {
                port: Port { lanes: 1 },
            },
            output: OutPlug {
                port: Port { lanes: 1 },
            },
        }
    }
}

impl Shadowed for Coupler {
    fn class_schema() -> &'static ClassSchema {
        static SCHEMA: LazyLock<ClassSchema> = LazyLock::new(|| {
            ClassSchema::builder::<Coupler>("Coupler")
                .base::<InPlug>(|c| &c.input)
                .base::<OutPlug>(|c| &c.output)
                .build()
        });
        LazyLock::force(&SCHEMA)
    }
}
