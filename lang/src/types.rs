use std::fmt::Display;
use std::ops::BitOr;

use itertools::Itertools;

/// A set of primitive type tags, or the wildcard `any`.
///
/// The bit representation is canonical, so two types are equal exactly when
/// they describe the same tag set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Type(u16);

const ANY_BIT: u16 = 1 << 15;

macro_rules! primitive_types {
    {
        $(($ident:ident, $bit:literal, $name:literal),)*
    } => {
        impl Type {
            $(pub const $ident: Type = Type(1 << $bit);)*

            const PRIMITIVES: &'static [(Type, &'static str)] = &[
                $((Type::$ident, $name),)*
            ];
        }
    };
}

primitive_types! {
    (NUM, 0, "num"),
    (STR, 1, "str"),
    (NULL, 2, "null"),
    (BLOCK, 3, "Block"),
    (UNIT, 4, "Unit"),
    (TEAM, 5, "Team"),
    (UNIT_TYPE, 6, "UnitType"),
    (ITEM_TYPE, 7, "ItemType"),
    (BLOCK_TYPE, 8, "BlockType"),
    (LIQUID_TYPE, 9, "LiquidType"),
    (CONTROLLER, 10, "Controller"),
}

impl Type {
    pub const ANY: Type = Type(ANY_BIT);

    /// Anything with a position in the world: buildings and units.
    pub const OBJECT: Type = Type(Type::BLOCK.0 | Type::UNIT.0);

    /// Anything `sensor @type` or `lookup` can produce.
    pub const CONTENT: Type = Type(
        Type::UNIT_TYPE.0 | Type::ITEM_TYPE.0 | Type::BLOCK_TYPE.0 | Type::LIQUID_TYPE.0,
    );

    pub const fn union(self, other: Type) -> Type {
        if self.0 & ANY_BIT != 0 || other.0 & ANY_BIT != 0 {
            Type::ANY
        } else {
            Type(self.0 | other.0)
        }
    }

    pub fn is_any(self) -> bool {
        self.0 & ANY_BIT != 0
    }

    /// Containment: `self` may be stored where `other` is expected.
    pub fn is_in(self, other: Type) -> bool {
        other.is_any() || self == Type::NULL || (!self.is_any() && self.0 & !other.0 == 0)
    }

    /// Whether some value could have both types.
    pub fn overlaps(self, other: Type) -> bool {
        self.is_any() || other.is_any() || self.0 & other.0 != 0
    }

    pub fn from_name(name: &str) -> Option<Type> {
        if name == "any" {
            return Some(Type::ANY);
        }
        Type::PRIMITIVES
            .iter()
            .find(|(_, n)| *n == name)
            .map(|(t, _)| *t)
    }
}

impl BitOr for Type {
    type Output = Type;

    fn bitor(self, rhs: Type) -> Type {
        self.union(rhs)
    }
}

impl Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_any() {
            return write!(f, "any");
        }
        if self.0 == 0 {
            return write!(f, "never");
        }
        let names = Type::PRIMITIVES
            .iter()
            .filter(|(t, _)| self.0 & t.0 != 0)
            .map(|(_, n)| n)
            .join(" | ");
        write!(f, "{}", names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_is_tag_set_union() {
        let t = Type::NUM | Type::STR;
        assert_eq!(t, Type::STR | Type::NUM);
        assert_eq!(t | Type::NUM, t);
        assert_eq!(t | Type::ANY, Type::ANY);
        assert_eq!(t.to_string(), "num | str");
    }

    #[test]
    fn containment() {
        assert!(Type::NUM.is_in(Type::NUM | Type::STR));
        assert!(!(Type::NUM | Type::STR).is_in(Type::NUM));
        assert!(Type::BLOCK.is_in(Type::ANY));
        assert!(!Type::ANY.is_in(Type::NUM));
        assert!(Type::NULL.is_in(Type::UNIT));
        assert!(Type::NULL.is_in(Type::NUM));
    }

    #[test]
    fn overlap_accepts_wildcard() {
        assert!(Type::ANY.overlaps(Type::NUM));
        assert!((Type::NUM | Type::STR).overlaps(Type::NUM));
        assert!(!Type::STR.overlaps(Type::NUM));
    }

    #[test]
    fn names_round_trip() {
        for name in ["num", "str", "Block", "UnitType", "any"] {
            assert_eq!(Type::from_name(name).unwrap().to_string(), name);
        }
        assert_eq!(Type::from_name("float"), None);
    }
}
