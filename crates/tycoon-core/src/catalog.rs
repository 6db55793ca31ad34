//! Static reference data: property definitions, board layout and card decks.
//!
//! A `Catalog` is loaded once at startup (from storage, or the built-in
//! [`Catalog::standard`] dataset) and is read-only afterwards. Sessions copy
//! the economics they need into their own board snapshot.

use crate::board::{GroupId, Money, Position, PropertyId, TileKind, BOARD_SIZE};
use crate::cards::{Card, CardDeck};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

/// Errors found while validating reference data
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Board layout must have exactly {expected} tiles, found {found}")]
    WrongTileCount { expected: usize, found: usize },

    #[error("Board position {0} is missing or duplicated")]
    BadPosition(Position),

    #[error("Unknown property id: {0}")]
    UnknownProperty(PropertyId),

    #[error("Tile at position {0} is ownable but has no property id")]
    MissingProperty(Position),

    #[error("Property {id} is a {found:?} but the layout places it as {expected:?}")]
    KindMismatch {
        id: PropertyId,
        expected: TileKind,
        found: TileKind,
    },
}

/// Rent tiers for an ownable tile
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RentSchedule {
    pub base: Money,
    /// Unimproved rent when one owner holds the whole group (0 = double base)
    pub full_group: Money,
    /// Rent with 1-4 houses
    pub houses: [Money; 4],
    pub hotel: Money,
}

/// One purchasable property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    pub id: PropertyId,
    pub name: String,
    pub kind: TileKind,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub group_name: Option<String>,
    #[serde(default)]
    pub group_color: Option<String>,
    pub price: Money,
    pub rent: RentSchedule,
    #[serde(default)]
    pub house_cost: Money,
    #[serde(default)]
    pub hotel_cost: Money,
    #[serde(default)]
    pub mortgage_value: Money,
    #[serde(default)]
    pub unmortgage_value: Money,
}

/// Position -> tile identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutEntry {
    pub position: Position,
    pub kind: TileKind,
    pub name: String,
    #[serde(default)]
    pub property_id: Option<PropertyId>,
    /// Charge for tax tiles
    #[serde(default)]
    pub amount: Money,
}

/// The full reference dataset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub properties: Vec<PropertyDef>,
    pub layout: Vec<LayoutEntry>,
    pub chance: Vec<Card>,
    pub community: Vec<Card>,
}

impl Catalog {
    pub fn property(&self, id: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.id == id)
    }

    pub fn deck(&self, deck: CardDeck) -> &[Card] {
        match deck {
            CardDeck::Chance => &self.chance,
            CardDeck::Community => &self.community,
        }
    }

    /// Check that the layout covers every position once and that every
    /// ownable tile resolves to a property of the same kind.
    pub fn validate(&self) -> Result<(), CatalogError> {
        if self.layout.len() != BOARD_SIZE as usize {
            return Err(CatalogError::WrongTileCount {
                expected: BOARD_SIZE as usize,
                found: self.layout.len(),
            });
        }

        let mut seen = HashSet::new();
        for entry in &self.layout {
            if entry.position >= BOARD_SIZE || !seen.insert(entry.position) {
                return Err(CatalogError::BadPosition(entry.position));
            }

            if entry.kind.is_ownable() {
                let id = entry
                    .property_id
                    .as_ref()
                    .ok_or(CatalogError::MissingProperty(entry.position))?;
                let def = self
                    .property(id)
                    .ok_or_else(|| CatalogError::UnknownProperty(id.clone()))?;
                if def.kind != entry.kind {
                    return Err(CatalogError::KindMismatch {
                        id: id.clone(),
                        expected: entry.kind,
                        found: def.kind,
                    });
                }
            }
        }

        Ok(())
    }

    /// The built-in 64-tile dataset
    pub fn standard() -> Self {
        let mut builder = StandardBuilder::default();
        for (position, row) in STANDARD_LAYOUT.iter().enumerate() {
            builder.push(position as Position, row);
        }

        Self {
            properties: builder.properties,
            layout: builder.layout,
            chance: standard_deck(CardDeck::Chance, STANDARD_CHANCE),
            community: standard_deck(CardDeck::Community, STANDARD_COMMUNITY),
        }
    }
}

// ==================== Built-in dataset ====================

enum Row {
    Corner(TileKind, &'static str),
    Street(u8, &'static str, Money),
    Railroad(&'static str, Money),
    Utility(&'static str, Money),
    Park(&'static str, Money),
    Attraction(&'static str, Money),
    Chance,
    Community,
    Tax(&'static str, Money),
}

/// (name, display colour) per street group, indexed by group number - 1
const GROUPS: [(&str, &str); 12] = [
    ("Old Quarter", "#8b5a2b"),
    ("Riverside", "#7dd3fc"),
    ("Market District", "#f472b6"),
    ("University Hill", "#fb923c"),
    ("Garden Heights", "#ef4444"),
    ("Theatre Row", "#facc15"),
    ("Financial Center", "#22c55e"),
    ("Harbour View", "#3b82f6"),
    ("Hillcrest", "#a855f7"),
    ("Lakeside", "#14b8a6"),
    ("Embassy Row", "#64748b"),
    ("Skyline", "#1e3a8a"),
];

const STANDARD_LAYOUT: [Row; 64] = [
    Row::Corner(TileKind::Go, "GO"),
    Row::Street(1, "Mill Lane", 60),
    Row::Community,
    Row::Street(1, "Tanner Street", 60),
    Row::Street(1, "Cooper Yard", 80),
    Row::Tax("Income Tax", 200),
    Row::Street(2, "Ferry Road", 80),
    Row::Attraction("Grand Mall", 200),
    Row::Railroad("Central Station", 200),
    Row::Street(2, "Wharf Street", 80),
    Row::Street(2, "Quay Terrace", 100),
    Row::Park("Botanic Park", 150),
    Row::Street(3, "Grocers Row", 100),
    Row::Chance,
    Row::Street(3, "Spice Alley", 100),
    Row::Street(3, "Exchange Square", 120),
    Row::Corner(TileKind::Jail, "Jail"),
    Row::Street(4, "Scholars Walk", 140),
    Row::Utility("Power Company", 150),
    Row::Street(4, "Library Lane", 140),
    Row::Street(4, "Campus Green", 160),
    Row::Attraction("City Arena", 180),
    Row::Street(5, "Rose Avenue", 140),
    Row::Street(5, "Orchard Close", 140),
    Row::Railroad("North Terminal", 200),
    Row::Park("Hill Park", 150),
    Row::Street(5, "Linden Parade", 160),
    Row::Community,
    Row::Street(6, "Curtain Street", 180),
    Row::Street(6, "Opera Place", 180),
    Row::Utility("Water Works", 150),
    Row::Street(6, "Gallery Court", 200),
    Row::Corner(TileKind::FreeParking, "Free Parking"),
    Row::Street(7, "Bond Street", 220),
    Row::Utility("Telecom Exchange", 150),
    Row::Chance,
    Row::Street(7, "Ledger Avenue", 220),
    Row::Street(7, "Mint Plaza", 240),
    Row::Attraction("National Stadium", 180),
    Row::Street(8, "Lighthouse Road", 260),
    Row::Railroad("East Depot", 200),
    Row::Street(8, "Marina Drive", 260),
    Row::Street(8, "Beacon Point", 280),
    Row::Park("Forest Park", 150),
    Row::Street(9, "Summit Avenue", 300),
    Row::Street(9, "Ridge Road", 300),
    Row::Utility("Gas Company", 150),
    Row::Street(9, "Crown Terrace", 320),
    Row::Corner(TileKind::GoToJail, "Go To Jail"),
    Row::Street(10, "Willow Shore", 300),
    Row::Street(10, "Heron Bay", 300),
    Row::Utility("Metro Authority", 150),
    Row::Community,
    Row::Street(10, "Regatta Quay", 320),
    Row::Attraction("Riverside Casino", 180),
    Row::Street(11, "Consulate Way", 300),
    Row::Railroad("Airport Express", 200),
    Row::Utility("Tram Network", 150),
    Row::Street(11, "Ambassador Drive", 300),
    Row::Street(11, "Legation Square", 320),
    Row::Chance,
    Row::Street(12, "Tower Boulevard", 400),
    Row::Tax("Luxury Tax", 100),
    Row::Street(12, "Penthouse Parade", 400),
];

const STANDARD_CHANCE: &[(&str, &str, &str)] = &[
    ("Advance to GO", "Collect 200 as you pass.", "move:GO"),
    ("Go to Jail", "Go directly to jail.", "move:JAIL"),
    ("Wrong turn", "Go back three spaces.", "move:-3"),
    ("Catch a train", "Advance to the nearest railroad.", "move:nearest_railroad"),
    ("Meter reading", "Advance to the nearest utility.", "move:nearest_utility"),
    ("Sightseeing tour", "Advance to a random property.", "move:random_property"),
    ("Penthouse viewing", "Advance to the last property on the board.", "move:last_property"),
    ("General repairs", "Pay 25 per house and 100 per hotel.", "repair:25:100"),
    ("Speeding fine", "Pay 15.", "pay:15"),
    ("Bank dividend", "Collect 50.", "collect:50"),
    ("Chairman of the board", "Pay every player 50.", "pay_all:50"),
    ("Good behaviour", "Collect a 50 bonus.", "jail_free"),
];

const STANDARD_COMMUNITY: &[(&str, &str, &str)] = &[
    ("Grand opening", "Advance to GO and collect 500.", "move:GO_BONUS"),
    ("Bank error in your favour", "Collect 200.", "collect:200"),
    ("Doctor's fee", "Pay 50.", "pay:50"),
    ("Birthday", "Collect 10 from every player.", "collect_all:10"),
    ("Tax refund", "Collect 20.", "collect:20"),
    ("Hospital fees", "Pay 100.", "pay:100"),
    ("Street repairs", "Pay 40 per house and 115 per hotel.", "repair:40:115"),
    ("Go to Jail", "Go directly to jail.", "move:JAIL"),
    ("Inheritance", "Collect 100.", "collect:100"),
    ("Block party", "Pay every player 25.", "pay_all:25"),
    ("Good behaviour", "Collect a 50 bonus.", "jail_free"),
    ("Consulting fee", "Collect 25.", "collect:25"),
];

fn standard_deck(deck: CardDeck, rows: &[(&str, &str, &str)]) -> Vec<Card> {
    rows.iter()
        .enumerate()
        .map(|(idx, (title, description, effect))| Card {
            id: idx as u32 + 1,
            deck,
            title: title.to_string(),
            description: description.to_string(),
            effect: effect.to_string(),
        })
        .collect()
}

#[derive(Default)]
struct StandardBuilder {
    properties: Vec<PropertyDef>,
    layout: Vec<LayoutEntry>,
    group_counts: [u8; 12],
    railroads: u8,
    utilities: u8,
    attractions: u8,
    parks: u8,
}

impl StandardBuilder {
    fn push(&mut self, position: Position, row: &Row) {
        let (kind, name, property, amount) = match *row {
            Row::Corner(kind, name) => (kind, name, None, 0),
            Row::Chance => (TileKind::Chance, "Chance", None, 0),
            Row::Community => (TileKind::Community, "Community Chest", None, 0),
            Row::Tax(name, amount) => (TileKind::Tax, name, None, amount),
            Row::Street(group, name, price) => {
                let def = self.street(group, name, price);
                (TileKind::Property, name, Some(def), 0)
            }
            Row::Railroad(name, price) => {
                self.railroads += 1;
                let id = format!("2.{}", self.railroads);
                let def = flat(id, name, TileKind::Railroad, price, 25);
                (TileKind::Railroad, name, Some(def), 0)
            }
            Row::Utility(name, price) => {
                self.utilities += 1;
                let id = format!("3.{}", self.utilities);
                let def = flat(id, name, TileKind::Utility, price, 0);
                (TileKind::Utility, name, Some(def), 0)
            }
            Row::Attraction(name, price) => {
                self.attractions += 1;
                let id = format!("4.{}", self.attractions);
                let def = flat(id, name, TileKind::Attraction, price, 35);
                (TileKind::Attraction, name, Some(def), 0)
            }
            Row::Park(name, price) => {
                self.parks += 1;
                let id = format!("5.{}", self.parks);
                let def = flat(id, name, TileKind::Park, price, 25);
                (TileKind::Park, name, Some(def), 0)
            }
        };

        self.layout.push(LayoutEntry {
            position,
            kind,
            name: name.to_string(),
            property_id: property.as_ref().map(|p| p.id.clone()),
            amount,
        });
        if let Some(def) = property {
            self.properties.push(def);
        }
    }

    fn street(&mut self, group: u8, name: &str, price: Money) -> PropertyDef {
        let slot = (group - 1) as usize;
        self.group_counts[slot] += 1;
        let (group_name, color) = GROUPS[slot];

        let base = (price / 10).max(2);
        let house_cost = match group {
            1..=3 => 50,
            4..=6 => 100,
            7..=9 => 150,
            _ => 200,
        };
        let mortgage_value = price / 2;

        PropertyDef {
            id: format!("1.{}.{}", group, self.group_counts[slot]),
            name: name.to_string(),
            kind: TileKind::Property,
            group_id: Some(format!("1.{}", group)),
            group_name: Some(group_name.to_string()),
            group_color: Some(color.to_string()),
            price,
            rent: RentSchedule {
                base,
                full_group: base * 2,
                houses: [base * 5, base * 15, base * 40, base * 55],
                hotel: base * 70,
            },
            house_cost,
            hotel_cost: house_cost * 2,
            mortgage_value,
            unmortgage_value: mortgage_value + mortgage_value / 10,
        }
    }
}

fn flat(id: String, name: &str, kind: TileKind, price: Money, base: Money) -> PropertyDef {
    let mortgage_value = price / 2;
    PropertyDef {
        id,
        name: name.to_string(),
        kind,
        group_id: None,
        group_name: None,
        group_color: None,
        price,
        rent: RentSchedule {
            base,
            ..RentSchedule::default()
        },
        house_cost: 0,
        hotel_cost: 0,
        mortgage_value,
        unmortgage_value: mortgage_value + mortgage_value / 10,
    }
}
