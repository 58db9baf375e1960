use std::collections::BTreeMap;

use crate::{
    error::ErrorKind,
    natives,
    types::Type,
    value::{Value, Variable},
};

/// Block kinds that get numbered link names when placed next to a processor.
const LINKABLE_BLOCKS: &[&str] = &[
    "cell", "bank", "message", "switch", "display", "processor", "memory", "sorter",
    "container", "vault", "core", "node", "battery", "door", "unloader", "router",
    "illuminator", "duo", "hail", "lancer", "wave", "arc", "salvo", "ripple", "cyclone",
    "fuse", "swarmer", "segment", "tsunami", "spectre", "meltdown", "foreshadow",
];

const BUILTIN_NUMBERS: &[&str] = &[
    "@thisx", "@thisy", "@ipt", "@links", "@time", "@tick", "@second", "@minute",
    "@waveNumber", "@waveTime", "@mapw", "@maph", "@server", "@ctrlProcessor",
    "@ctrlPlayer", "@ctrlCommand", "@pi", "@e", "@degToRad", "@radToDeg",
];

const TEAMS: &[&str] = &["@derelict", "@sharded", "@crux", "@malis", "@green", "@blue"];

const ITEMS: &[&str] = &[
    "@copper", "@lead", "@metaglass", "@graphite", "@sand", "@coal", "@titanium", "@thorium",
    "@scrap", "@silicon", "@plastanium", "@phase-fabric", "@surge-alloy", "@spore-pod",
    "@blast-compound", "@pyratite",
];

const LIQUIDS: &[&str] = &["@water", "@slag", "@oil", "@cryofluid"];

const UNIT_TYPES: &[&str] = &[
    "@dagger", "@mace", "@fortress", "@scepter", "@reign", "@nova", "@pulsar", "@quasar",
    "@crawler", "@atrax", "@spiroct", "@arkyid", "@flare", "@horizon", "@zenith",
    "@antumbra", "@eclipse", "@mono", "@poly", "@mega", "@quad", "@oct", "@risso",
    "@minke", "@bryde", "@alpha", "@beta", "@gamma",
];

const BLOCK_TYPES: &[&str] = &[
    "@conveyor", "@titanium-conveyor", "@junction", "@router", "@sorter", "@container",
    "@vault", "@memory-cell", "@memory-bank", "@message", "@switch", "@micro-processor",
    "@logic-processor", "@logic-display", "@battery", "@duo", "@core-shard",
];

/// The builtin table at the bottom of every scope stack.
fn builtins() -> BTreeMap<String, Value> {
    let mut table = BTreeMap::new();
    let mut constant = |name: &str, ty: Type| {
        table.insert(
            name.to_owned(),
            Value::Variable(Variable::constant(name, ty)),
        );
    };
    constant(crate::instruction::COUNTER, Type::NUM);
    constant("@this", Type::BLOCK);
    constant("@unit", Type::UNIT);
    for name in BUILTIN_NUMBERS {
        constant(name, Type::NUM);
    }
    for (names, ty) in [
        (TEAMS, Type::TEAM),
        (ITEMS, Type::ITEM_TYPE),
        (LIQUIDS, Type::LIQUID_TYPE),
        (UNIT_TYPES, Type::UNIT_TYPE),
        (BLOCK_TYPES, Type::BLOCK_TYPE),
    ] {
        for name in names {
            constant(name, ty);
        }
    }
    for name in natives::names() {
        table.insert(name.to_owned(), Value::Native(name));
    }
    table
}

/// Whether `name` is what the game calls a linked building, like `cell1`.
pub fn is_link_name(name: &str) -> bool {
    let digits = name.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    let kind = &name[..name.len() - digits.len()];
    !digits.is_empty()
        && digits.bytes().all(|b| b.is_ascii_digit())
        && !digits.starts_with('0')
        && LINKABLE_BLOCKS.contains(&kind)
}

/// Lexical scopes, innermost last. The first table holds the builtins and is
/// never popped.
#[derive(Debug)]
pub struct Scope {
    tables: Vec<BTreeMap<String, Value>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            tables: vec![builtins(), BTreeMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.tables.push(BTreeMap::new());
    }

    pub fn pop(&mut self) {
        assert!(self.tables.len() > 2, "popped the global scope");
        self.tables.pop();
    }

    pub fn declare(&mut self, name: &str, value: Value) -> Result<(), ErrorKind> {
        let table = self.tables.last_mut().expect("scope stack is never empty");
        if table.contains_key(name) {
            return Err(ErrorKind::AlreadyDefined {
                name: name.to_owned(),
            });
        }
        table.insert(name.to_owned(), value);
        Ok(())
    }

    /// The innermost binding of `name`.
    pub fn lookup(&self, name: &str) -> Result<Value, ErrorKind> {
        if let Some(value) = self.tables.iter().rev().find_map(|t| t.get(name)) {
            return Ok(value.clone());
        }
        if is_link_name(name) {
            return Ok(Value::Variable(Variable::constant(name, Type::BLOCK)));
        }
        Err(ErrorKind::UndefinedSymbol {
            name: name.to_owned(),
        })
    }

    /// Binding of `name` in the innermost table only.
    pub fn lookup_local(&self, name: &str) -> Option<&Value> {
        self.tables.last().and_then(|t| t.get(name))
    }
}
