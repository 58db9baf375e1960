//! Signatures of the natively supported instructions, as callable from
//! source code.

use crate::{instruction::Opcode, types::Type};

/// One parameter slot of the emitted instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Caller supplies a value of this type.
    In(Type),
    /// Caller supplies a variable the instruction writes.
    Out(Type),
    /// Caller supplies one of these bare words.
    Config(&'static [&'static str]),
    /// Allocated by the compiler; becomes the value of the call.
    Ret(Type),
    /// Emitted as-is, not supplied by the caller.
    Fixed(&'static str),
}

impl Slot {
    fn is_supplied(self) -> bool {
        matches!(self, Slot::In(_) | Slot::Out(_) | Slot::Config(_))
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct Signature {
    pub name: &'static str,
    /// First argument selecting the variant of a multi-mode instruction.
    pub mode: Option<&'static str>,
    pub opcode: Opcode,
    pub slots: &'static [Slot],
    /// Each argument becomes its own instruction with the single slot.
    pub variadic: bool,
}

impl Signature {
    /// Number of arguments the caller supplies, not counting the mode.
    pub fn arity(&self) -> usize {
        self.slots.iter().filter(|s| s.is_supplied()).count()
    }
}

use Slot::{Config, Fixed, In, Out, Ret};

const NUM: Slot = In(Type::NUM);
const BLOCK: Slot = In(Type::BLOCK);

const RADAR_TARGETS: &[&str] = &[
    "any", "enemy", "ally", "player", "attacker", "flying", "boss", "ground",
];
const RADAR_SORTS: &[&str] = &["distance", "health", "shield", "armor", "maxHealth"];
const LOCATE_GROUPS: &[&str] = &[
    "core",
    "storage",
    "generator",
    "turret",
    "factory",
    "repair",
    "rally",
    "battery",
    "reactor",
];

macro_rules! natives {
    (@mode) => { None };
    (@mode $mode:literal) => { Some($mode) };
    (@variadic) => { false };
    (@variadic variadic) => { true };
    {
        $(($name:literal $(, $mode:literal)?) => $opcode:ident [$($slot:expr),* $(,)?] $($variadic:ident)?;)*
    } => {
        pub const SIGNATURES: &[Signature] = &[
            $(Signature {
                name: $name,
                mode: natives!(@mode $($mode)?),
                opcode: Opcode::$opcode,
                slots: &[$($slot),*],
                variadic: natives!(@variadic $($variadic)?),
            },)*
        ];
    };
}

natives! {
    ("print") => Print [In(Type::ANY)] variadic;
    ("printflush") => PrintFlush [BLOCK];
    ("drawflush") => DrawFlush [BLOCK];
    ("wait") => Wait [NUM];
    ("end") => End [];
    ("stop") => Stop [];
    ("getlink") => GetLink [Ret(Type::BLOCK), NUM];
    ("read") => Read [Ret(Type::NUM), BLOCK, NUM];
    ("write") => Write [NUM, BLOCK, NUM];
    ("sensor") => Sensor [Ret(Type::ANY), In(Type::OBJECT), In(Type::ANY)];
    ("packcolor") => PackColor [Ret(Type::NUM), NUM, NUM, NUM, NUM];
    ("ubind") => UBind [In(Type::UNIT_TYPE.union(Type::UNIT))];
    ("radar") => Radar [
        Config(RADAR_TARGETS), Config(RADAR_TARGETS), Config(RADAR_TARGETS),
        Config(RADAR_SORTS), BLOCK, NUM, Ret(Type::UNIT),
    ];
    ("uradar") => URadar [
        Config(RADAR_TARGETS), Config(RADAR_TARGETS), Config(RADAR_TARGETS),
        Config(RADAR_SORTS), Fixed("0"), NUM, Ret(Type::UNIT),
    ];

    ("lookup", "block") => Lookup [Fixed("block"), Ret(Type::BLOCK_TYPE), NUM];
    ("lookup", "unit") => Lookup [Fixed("unit"), Ret(Type::UNIT_TYPE), NUM];
    ("lookup", "item") => Lookup [Fixed("item"), Ret(Type::ITEM_TYPE), NUM];
    ("lookup", "liquid") => Lookup [Fixed("liquid"), Ret(Type::LIQUID_TYPE), NUM];

    ("control", "enabled") => Control [Fixed("enabled"), BLOCK, NUM];
    ("control", "shoot") => Control [Fixed("shoot"), BLOCK, NUM, NUM, NUM];
    ("control", "shootp") => Control [Fixed("shootp"), BLOCK, In(Type::UNIT), NUM];
    ("control", "config") => Control [Fixed("config"), BLOCK, In(Type::ANY)];
    ("control", "color") => Control [Fixed("color"), BLOCK, NUM];

    ("draw", "clear") => Draw [Fixed("clear"), NUM, NUM, NUM];
    ("draw", "color") => Draw [Fixed("color"), NUM, NUM, NUM, NUM];
    ("draw", "col") => Draw [Fixed("col"), NUM];
    ("draw", "stroke") => Draw [Fixed("stroke"), NUM];
    ("draw", "line") => Draw [Fixed("line"), NUM, NUM, NUM, NUM];
    ("draw", "rect") => Draw [Fixed("rect"), NUM, NUM, NUM, NUM];
    ("draw", "lineRect") => Draw [Fixed("lineRect"), NUM, NUM, NUM, NUM];
    ("draw", "poly") => Draw [Fixed("poly"), NUM, NUM, NUM, NUM, NUM];
    ("draw", "linePoly") => Draw [Fixed("linePoly"), NUM, NUM, NUM, NUM, NUM];
    ("draw", "triangle") => Draw [Fixed("triangle"), NUM, NUM, NUM, NUM, NUM, NUM];
    ("draw", "image") => Draw [Fixed("image"), NUM, NUM, In(Type::CONTENT), NUM, NUM];

    ("ucontrol", "idle") => UControl [Fixed("idle")];
    ("ucontrol", "stop") => UControl [Fixed("stop")];
    ("ucontrol", "move") => UControl [Fixed("move"), NUM, NUM];
    ("ucontrol", "approach") => UControl [Fixed("approach"), NUM, NUM, NUM];
    ("ucontrol", "boost") => UControl [Fixed("boost"), NUM];
    ("ucontrol", "target") => UControl [Fixed("target"), NUM, NUM, NUM];
    ("ucontrol", "targetp") => UControl [Fixed("targetp"), In(Type::UNIT), NUM];
    ("ucontrol", "itemDrop") => UControl [Fixed("itemDrop"), BLOCK, NUM];
    ("ucontrol", "itemTake") => UControl [Fixed("itemTake"), BLOCK, In(Type::ITEM_TYPE), NUM];
    ("ucontrol", "payDrop") => UControl [Fixed("payDrop")];
    ("ucontrol", "payTake") => UControl [Fixed("payTake"), NUM];
    ("ucontrol", "mine") => UControl [Fixed("mine"), NUM, NUM];
    ("ucontrol", "flag") => UControl [Fixed("flag"), NUM];
    ("ucontrol", "build") => UControl [Fixed("build"), NUM, NUM, In(Type::BLOCK_TYPE), NUM, In(Type::ANY)];
    ("ucontrol", "getBlock") => UControl [Fixed("getBlock"), NUM, NUM, Out(Type::BLOCK_TYPE), Out(Type::BLOCK)];
    ("ucontrol", "within") => UControl [Fixed("within"), NUM, NUM, NUM, Ret(Type::NUM)];
    ("ucontrol", "unbind") => UControl [Fixed("unbind")];

    ("ulocate", "building") => ULocate [
        Fixed("building"), Config(LOCATE_GROUPS), NUM, Fixed("@copper"),
        Out(Type::NUM), Out(Type::NUM), Out(Type::NUM), Out(Type::BLOCK),
    ];
    ("ulocate", "ore") => ULocate [
        Fixed("ore"), Fixed("core"), Fixed("true"), In(Type::ITEM_TYPE),
        Out(Type::NUM), Out(Type::NUM), Out(Type::NUM),
    ];
    ("ulocate", "spawn") => ULocate [
        Fixed("spawn"), Fixed("core"), Fixed("true"), Fixed("@copper"),
        Out(Type::NUM), Out(Type::NUM), Out(Type::NUM), Out(Type::BLOCK),
    ];
    ("ulocate", "damaged") => ULocate [
        Fixed("damaged"), Fixed("core"), Fixed("true"), Fixed("@copper"),
        Out(Type::NUM), Out(Type::NUM), Out(Type::NUM), Out(Type::BLOCK),
    ];

    ("abs") => Op [Fixed("abs"), Ret(Type::NUM), NUM];
    ("log") => Op [Fixed("log"), Ret(Type::NUM), NUM];
    ("log10") => Op [Fixed("log10"), Ret(Type::NUM), NUM];
    ("floor") => Op [Fixed("floor"), Ret(Type::NUM), NUM];
    ("ceil") => Op [Fixed("ceil"), Ret(Type::NUM), NUM];
    ("sqrt") => Op [Fixed("sqrt"), Ret(Type::NUM), NUM];
    ("rand") => Op [Fixed("rand"), Ret(Type::NUM), NUM];
    ("sin") => Op [Fixed("sin"), Ret(Type::NUM), NUM];
    ("cos") => Op [Fixed("cos"), Ret(Type::NUM), NUM];
    ("tan") => Op [Fixed("tan"), Ret(Type::NUM), NUM];
    ("asin") => Op [Fixed("asin"), Ret(Type::NUM), NUM];
    ("acos") => Op [Fixed("acos"), Ret(Type::NUM), NUM];
    ("atan") => Op [Fixed("atan"), Ret(Type::NUM), NUM];
    ("max") => Op [Fixed("max"), Ret(Type::NUM), NUM, NUM];
    ("min") => Op [Fixed("min"), Ret(Type::NUM), NUM, NUM];
    ("angle") => Op [Fixed("angle"), Ret(Type::NUM), NUM, NUM];
    ("len") => Op [Fixed("len"), Ret(Type::NUM), NUM, NUM];
    ("noise") => Op [Fixed("noise"), Ret(Type::NUM), NUM, NUM];
}

/// Whether the native selects its variant through a mode word.
pub fn has_modes(name: &str) -> bool {
    SIGNATURES.iter().any(|s| s.name == name && s.mode.is_some())
}

pub fn modes(name: &str) -> impl Iterator<Item = &'static str> + '_ {
    SIGNATURES
        .iter()
        .filter(move |s| s.name == name)
        .filter_map(|s| s.mode)
}

/// Whether some variant of the native writes caller-supplied variables.
pub fn writes_arguments(name: &str) -> bool {
    SIGNATURES
        .iter()
        .any(|s| s.name == name && s.slots.iter().any(|slot| matches!(slot, Out(_))))
}

pub fn lookup(name: &str, mode: Option<&str>) -> Option<&'static Signature> {
    SIGNATURES
        .iter()
        .find(|s| s.name == name && s.mode == mode)
}

/// Names callable without a mode, in source order, deduplicated.
pub fn names() -> impl Iterator<Item = &'static str> {
    let mut seen = Vec::new();
    SIGNATURES.iter().filter_map(move |s| {
        if seen.contains(&s.name) {
            None
        } else {
            seen.push(s.name);
            Some(s.name)
        }
    })
}

/// The type a `sensor` of `property` yields, if the property exists.
pub fn sensor_type(property: &str) -> Option<Type> {
    Some(match property {
        "totalItems" | "totalLiquids" | "totalPower" | "itemCapacity" | "liquidCapacity"
        | "powerCapacity" | "powerNetStored" | "powerNetCapacity" | "powerNetIn"
        | "powerNetOut" | "ammo" | "ammoCapacity" | "health" | "maxHealth" | "heat"
        | "efficiency" | "progress" | "timescale" | "rotation" | "x" | "y" | "shootX"
        | "shootY" | "size" | "dead" | "range" | "shooting" | "boosting" | "mineX"
        | "mineY" | "mining" | "speed" | "flag" | "controlled" | "payloadCount"
        | "enabled" | "color" | "memoryCapacity" | "bufferSize" => Type::NUM,
        "firstItem" => Type::ITEM_TYPE,
        "team" => Type::TEAM,
        "type" | "payloadType" => Type::CONTENT,
        "controller" => Type::CONTROLLER.union(Type::UNIT).union(Type::BLOCK),
        "name" => Type::STR,
        "config" => Type::ANY,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_select_signatures() {
        assert!(has_modes("control"));
        assert!(!has_modes("print"));
        let shoot = lookup("control", Some("shoot")).unwrap();
        assert_eq!(shoot.arity(), 4);
        assert_eq!(shoot.slots.len(), 5);
        assert!(lookup("control", None).is_none());
        assert!(modes("draw").any(|m| m == "triangle"));
    }

    #[test]
    fn slots_fit_the_opcode() {
        for sig in SIGNATURES {
            assert!(
                sig.slots.len() <= sig.opcode.arity(),
                "{} {:?}",
                sig.name,
                sig.mode
            );
            let results = sig.slots.iter().filter(|s| matches!(s, Ret(_))).count();
            assert!(results <= 1, "{}", sig.name);
        }
    }

    #[test]
    fn names_are_unique() {
        let names: Vec<_> = names().collect();
        assert_eq!(names.iter().filter(|n| **n == "draw").count(), 1);
        assert!(names.contains(&"max"));
        assert!(names.contains(&"ulocate"));
        assert!(writes_arguments("ulocate"));
        assert!(!writes_arguments("print"));
        assert!(!names.contains(&"foo"));
    }

    #[test]
    fn sensor_types() {
        assert_eq!(sensor_type("health"), Some(Type::NUM));
        assert_eq!(sensor_type("firstItem"), Some(Type::ITEM_TYPE));
        assert_eq!(sensor_type("nope"), None);
    }
}
