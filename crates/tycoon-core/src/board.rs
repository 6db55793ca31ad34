//! Board representation: the 64-tile loop and its tiles.
//!
//! This module contains:
//! - Identifier and money aliases shared across the engine
//! - Tile kinds and per-tile economics (rent schedule, build and mortgage values)
//! - The `Board` snapshot built from the reference catalog, with lookup helpers
//!
//! Ownership is not stored on tiles: the game state keeps the
//! single property-to-owner map.

use crate::catalog::{Catalog, CatalogError, RentSchedule};
use serde::{Deserialize, Serialize};

/// Authenticated user identifier (human UUID or synthetic bot id)
pub type UserId = String;

/// Identifier of an ownable property in the reference catalog
pub type PropertyId = String;

/// Identifier of a colour group, e.g. "1.4"
pub type GroupId = String;

/// Cash amounts. Signed because balances may go negative.
pub type Money = i64;

/// Board position, 0..BOARD_SIZE
pub type Position = u8;

/// Number of tiles on the loop
pub const BOARD_SIZE: u8 = 64;

/// Highest build level (5 = hotel)
pub const MAX_BUILD_LEVEL: u8 = 5;

/// Semantic type of a tile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TileKind {
    Property,
    Railroad,
    Utility,
    Park,
    Attraction,
    Chance,
    Community,
    Tax,
    Go,
    Jail,
    FreeParking,
    GoToJail,
}

impl TileKind {
    /// Whether a player can own this tile
    pub fn is_ownable(self) -> bool {
        matches!(
            self,
            TileKind::Property
                | TileKind::Railroad
                | TileKind::Utility
                | TileKind::Park
                | TileKind::Attraction
        )
    }

    /// Whether landing here requires drawing a card
    pub fn is_card(self) -> bool {
        matches!(self, TileKind::Chance | TileKind::Community)
    }

    /// Whether buildings can be placed on this kind of tile
    pub fn is_buildable(self) -> bool {
        self == TileKind::Property
    }
}

/// A single board position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tile {
    pub position: Position,
    pub kind: TileKind,
    pub name: String,
    /// Present for ownable tiles
    pub property_id: Option<PropertyId>,
    /// Colour group, present for streets
    pub group_id: Option<GroupId>,
    /// Purchase price, or the amount charged on a tax tile
    pub price: Money,
    pub rent: RentSchedule,
    pub house_cost: Money,
    pub hotel_cost: Money,
    pub mortgage_value: Money,
    pub unmortgage_value: Money,
    /// 0-4 houses, 5 = hotel
    pub building_level: u8,
    pub mortgaged: bool,
}

impl Tile {
    fn plain(position: Position, kind: TileKind, name: String, price: Money) -> Self {
        Self {
            position,
            kind,
            name,
            property_id: None,
            group_id: None,
            price,
            rent: RentSchedule::default(),
            house_cost: 0,
            hotel_cost: 0,
            mortgage_value: 0,
            unmortgage_value: 0,
            building_level: 0,
            mortgaged: false,
        }
    }

    pub fn has_buildings(&self) -> bool {
        self.building_level > 0
    }
}

/// The 64-tile board snapshot held by every session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Board {
    tiles: Vec<Tile>,
}

impl Board {
    /// Build a fresh board (no buildings, nothing mortgaged) from reference data
    pub fn from_catalog(catalog: &Catalog) -> Result<Self, CatalogError> {
        catalog.validate()?;

        let mut layout: Vec<_> = catalog.layout.iter().collect();
        layout.sort_by_key(|entry| entry.position);

        let mut tiles = Vec::with_capacity(BOARD_SIZE as usize);
        for entry in layout {
            let mut tile = Tile::plain(entry.position, entry.kind, entry.name.clone(), entry.amount);

            if let Some(id) = &entry.property_id {
                let def = catalog
                    .property(id)
                    .ok_or_else(|| CatalogError::UnknownProperty(id.clone()))?;
                tile.name = def.name.clone();
                tile.property_id = Some(def.id.clone());
                tile.group_id = def.group_id.clone();
                tile.price = def.price;
                tile.rent = def.rent.clone();
                tile.house_cost = def.house_cost;
                tile.hotel_cost = def.hotel_cost;
                tile.mortgage_value = def.mortgage_value;
                tile.unmortgage_value = def.unmortgage_value;
            }

            tiles.push(tile);
        }

        Ok(Self { tiles })
    }

    pub fn tiles(&self) -> &[Tile] {
        &self.tiles
    }

    pub fn tile(&self, position: Position) -> Option<&Tile> {
        self.tiles.get(position as usize)
    }

    pub fn tile_mut(&mut self, position: Position) -> Option<&mut Tile> {
        self.tiles.get_mut(position as usize)
    }

    /// Find the tile carrying a property id
    pub fn property_tile(&self, property_id: &str) -> Option<&Tile> {
        self.tiles
            .iter()
            .find(|t| t.property_id.as_deref() == Some(property_id))
    }

    pub fn property_tile_mut(&mut self, property_id: &str) -> Option<&mut Tile> {
        self.tiles
            .iter_mut()
            .find(|t| t.property_id.as_deref() == Some(property_id))
    }

    /// All tiles belonging to a colour group
    pub fn group_tiles<'a>(&'a self, group_id: &'a str) -> impl Iterator<Item = &'a Tile> + 'a {
        self.tiles
            .iter()
            .filter(move |t| t.group_id.as_deref() == Some(group_id))
    }

    /// Property ids of every tile in a group
    pub fn group_property_ids(&self, group_id: &str) -> Vec<PropertyId> {
        self.group_tiles(group_id)
            .filter_map(|t| t.property_id.clone())
            .collect()
    }

    /// First tile of a kind, scanning from position 0
    pub fn first_of_kind(&self, kind: TileKind) -> Option<Position> {
        self.tiles.iter().find(|t| t.kind == kind).map(|t| t.position)
    }

    /// Next tile of a kind strictly after `from`, wrapping around the loop
    pub fn next_of_kind(&self, from: Position, kind: TileKind) -> Option<Position> {
        let len = self.tiles.len();
        (1..=len)
            .map(|step| (from as usize + step) % len)
            .find(|&idx| self.tiles[idx].kind == kind)
            .map(|idx| idx as Position)
    }

    /// Last ownable tile on the board
    pub fn last_ownable(&self) -> Option<Position> {
        self.tiles
            .iter()
            .rev()
            .find(|t| t.kind.is_ownable())
            .map(|t| t.position)
    }

    /// Positions of every ownable tile
    pub fn ownable_positions(&self) -> Vec<Position> {
        self.tiles
            .iter()
            .filter(|t| t.kind.is_ownable())
            .map(|t| t.position)
            .collect()
    }

    /// Move `steps` forward from `from`. Returns the new position and
    /// whether the move wrapped past GO.
    pub fn advance(from: Position, steps: u32) -> (Position, bool) {
        let next = ((from as u32 + steps) % BOARD_SIZE as u32) as Position;
        (next, next < from)
    }

    /// Move `steps` backward from `from` without crossing-GO semantics
    pub fn retreat(from: Position, steps: u32) -> Position {
        let size = BOARD_SIZE as i64;
        ((from as i64 - steps as i64).rem_euclid(size)) as Position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_standard_board_has_64_tiles() {
        let board = Board::from_catalog(&Catalog::standard()).unwrap();
        assert_eq!(board.tiles().len(), 64);
        assert_eq!(board.tile(0).unwrap().kind, TileKind::Go);
        assert_eq!(board.tile(16).unwrap().kind, TileKind::Jail);
        assert_eq!(board.tile(32).unwrap().kind, TileKind::FreeParking);
        assert_eq!(board.tile(48).unwrap().kind, TileKind::GoToJail);
    }

    #[test]
    fn test_tiles_are_indexed_by_position() {
        let board = Board::from_catalog(&Catalog::standard()).unwrap();
        for (idx, tile) in board.tiles().iter().enumerate() {
            assert_eq!(tile.position as usize, idx);
        }
    }

    #[test]
    fn test_advance_wraps_past_go() {
        assert_eq!(Board::advance(10, 7), (17, false));
        assert_eq!(Board::advance(60, 7), (3, true));
        assert_eq!(Board::advance(63, 1), (0, true));
    }

    #[test]
    fn test_retreat_wraps_backwards() {
        assert_eq!(Board::retreat(10, 3), 7);
        assert_eq!(Board::retreat(1, 3), 62);
    }

    #[test]
    fn test_next_of_kind_wraps() {
        let board = Board::from_catalog(&Catalog::standard()).unwrap();
        assert_eq!(board.next_of_kind(0, TileKind::Railroad), Some(8));
        assert_eq!(board.next_of_kind(8, TileKind::Railroad), Some(24));
        assert_eq!(board.next_of_kind(60, TileKind::Railroad), Some(8));
    }

    #[test]
    fn test_group_lookup() {
        let board = Board::from_catalog(&Catalog::standard()).unwrap();
        let positions: Vec<Position> = board.group_tiles("1.1").map(|t| t.position).collect();
        assert_eq!(positions, vec![1, 3, 4]);
        assert_eq!(board.group_property_ids("1.12").len(), 2);
    }

    #[test]
    fn test_property_tile_lookup() {
        let board = Board::from_catalog(&Catalog::standard()).unwrap();
        let tile = board.tile(8).unwrap();
        let id = tile.property_id.clone().unwrap();
        assert_eq!(board.property_tile(&id).unwrap().position, 8);
        assert!(board.property_tile("missing").is_none());
    }
}
