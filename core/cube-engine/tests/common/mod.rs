//! FILENAME: tests/common/mod.rs
//! Fixtures and assertion helpers for cube-engine integration tests.

#![allow(dead_code)]

use cube_engine::{Aggregator, Cube, CubeField, QueryConfig, RenderRow, View};
use data::{FieldType, Value};
use serde_json::json;

/// Test harness wrapping a cube loaded with fixture data.
pub struct TestHarness {
    pub cube: Cube,
}

impl TestHarness {
    /// Cube with the trade fields and no records.
    pub fn new() -> Self {
        TestHarness {
            cube: Cube::from_fields(TradeFixture::fields()),
        }
    }

    /// The small East/West dataset.
    pub fn with_regions() -> Self {
        let mut harness = Self::new();
        harness
            .cube
            .load_data(&RegionFixture::data(), None)
            .expect("load region fixture");
        harness
    }

    /// The multi-level trade dataset.
    pub fn with_trades() -> Self {
        let mut harness = Self::new();
        harness
            .cube
            .load_data(&TradeFixture::data(), None)
            .expect("load trade fixture");
        harness
    }

    /// `count` generated trades with integer amounts.
    pub fn with_generated_trades(count: usize, seed: u64) -> Self {
        let mut harness = Self::new();
        harness
            .cube
            .load_data(&TradeFixture::generated(count, seed), None)
            .expect("load generated trades");
        harness
    }

    pub fn query(&self, config: QueryConfig) -> Vec<RenderRow> {
        self.cube.execute_query(config).expect("execute query")
    }

    pub fn view(&mut self, config: QueryConfig) -> (u32, &View) {
        let id = self.cube.create_view(config, true).expect("create view");
        (id, self.cube.view(id).expect("view exists"))
    }
}

// ============================================================================
// TEST DATA FIXTURES
// ============================================================================

/// Minimal two-region dataset: East = 10 + 20, West = 5.
pub struct RegionFixture;

impl RegionFixture {
    pub fn data() -> Vec<serde_json::Value> {
        vec![
            json!({"id": "r1", "region": "East", "desk": "D1", "trader": "ann", "amt": 10, "qty": 1}),
            json!({"id": "r2", "region": "East", "desk": "D2", "trader": "bob", "amt": 20, "qty": 2}),
            json!({"id": "r3", "region": "West", "desk": "D3", "trader": "cid", "amt": 5, "qty": 3}),
        ]
    }
}

/// Trade records grouped by region, desk and trader.
pub struct TradeFixture;

impl TradeFixture {
    pub const REGIONS: [&'static str; 3] = ["East", "West", "North"];
    pub const DESKS: [&'static str; 4] = ["D1", "D2", "D3", "D4"];
    pub const TRADERS: [&'static str; 5] = ["ann", "bob", "cid", "dee", "eve"];

    pub fn fields() -> Vec<CubeField> {
        vec![
            CubeField::dimension("region", FieldType::String).with_aggregator(Aggregator::Unique),
            CubeField::dimension("desk", FieldType::String).with_aggregator(Aggregator::Unique),
            CubeField::dimension("trader", FieldType::String),
            CubeField::measure("amt", FieldType::Number, Aggregator::Sum),
            CubeField::measure("qty", FieldType::Int, Aggregator::Max),
        ]
    }

    pub fn data() -> Vec<serde_json::Value> {
        vec![
            json!({"id": "t1", "region": "East", "desk": "D1", "trader": "ann", "amt": 100, "qty": 5}),
            json!({"id": "t2", "region": "East", "desk": "D1", "trader": "bob", "amt": 50, "qty": 2}),
            json!({"id": "t3", "region": "East", "desk": "D2", "trader": "ann", "amt": 25, "qty": 9}),
            json!({"id": "t4", "region": "West", "desk": "D3", "trader": "cid", "amt": -40, "qty": 1}),
            json!({"id": "t5", "region": "West", "desk": "D3", "trader": "dee", "amt": 70, "qty": 4}),
            json!({"id": "t6", "region": "North", "desk": "D4", "trader": "eve", "amt": 12, "qty": 7}),
        ]
    }

    /// Deterministic pseudo-random trades.
    pub fn generated(count: usize, seed: u64) -> Vec<serde_json::Value> {
        let mut rng = Lcg::new(seed);
        (0..count)
            .map(|i| {
                json!({
                    "id": format!("g{}", i),
                    "region": Self::REGIONS[rng.below(Self::REGIONS.len())],
                    "desk": Self::DESKS[rng.below(Self::DESKS.len())],
                    "trader": Self::TRADERS[rng.below(Self::TRADERS.len())],
                    "amt": rng.below(2000) as i64 - 1000,
                    "qty": rng.below(50) as i64,
                })
            })
            .collect()
    }
}

/// Linear congruential generator for reproducible test data.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    pub fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

// ============================================================================
// ASSERTION HELPERS
// ============================================================================

/// Assert that a row holds the expected number for `field`.
pub fn assert_row_number(row: &RenderRow, field: &str, expected: f64) {
    assert_eq!(
        row.get(field),
        &Value::number(expected),
        "row {} field {}",
        row.id,
        field
    );
}

/// Finds a row by id in a rendered forest.
pub fn find_row<'a>(rows: &'a [RenderRow], id: &str) -> &'a RenderRow {
    rows.iter()
        .find_map(|r| r.find(id))
        .unwrap_or_else(|| panic!("row {} not found", id))
}

/// Row ids of a rendered forest, depth first.
pub fn row_ids(rows: &[RenderRow]) -> Vec<String> {
    fn walk(row: &RenderRow, out: &mut Vec<String>) {
        out.push(row.id.clone());
        for child in row.children() {
            walk(child, out);
        }
    }
    let mut out = Vec::new();
    for row in rows {
        walk(row, &mut out);
    }
    out
}
