//! The basin attribute catalog: which fields exist, what kind each one
//! is, and which persistence band it belongs to.
//!
//! Field kinds are a closed sum (numeric / compositional / categorical)
//! so normalization and aggregation dispatch on the variant instead of
//! inspecting values at runtime. Band membership is fixed per field:
//! Band A is physiographic bedrock (stable over geological time), B is
//! hydro-climatic baselines, C is bioclimatic proxies (modern values
//! used as relative spatial proxies only), D is anthropogenic markers
//! valid only for contemporary queries.

use serde::{Deserialize, Serialize};

use crate::error::{BasinError, Result};

// ── Persistence bands ─────────────────────────────────────────────────────────

/// Temporal-stability grouping of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Band {
    /// A: geomorphic bedrock attributes.
    Physiographic,
    /// B: hydro-climatic baselines (centuries to millennia).
    HydroClimatic,
    /// C: bioclimatic proxies from modern measurements.
    Bioclimatic,
    /// D: anthropogenic/modern markers.
    Anthropogenic,
}

/// A selection of bands to include in a signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandSet(u8);

impl BandSet {
    pub const fn empty() -> Self {
        BandSet(0)
    }

    /// All four bands (contemporary queries).
    pub const fn full() -> Self {
        BandSet(0b1111)
    }

    /// Bands A+B+C: the selection for historical analyses, which must
    /// exclude anthropogenic markers.
    pub const fn historic() -> Self {
        BandSet(0b0111)
    }

    pub const fn with(self, band: Band) -> Self {
        BandSet(self.0 | 1 << band_bit(band))
    }

    pub const fn without(self, band: Band) -> Self {
        BandSet(self.0 & !(1 << band_bit(band)))
    }

    pub const fn contains(self, band: Band) -> bool {
        self.0 & 1 << band_bit(band) != 0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

const fn band_bit(band: Band) -> u8 {
    match band {
        Band::Physiographic => 0,
        Band::HydroClimatic => 1,
        Band::Bioclimatic => 2,
        Band::Anthropogenic => 3,
    }
}

// ── Field definitions ─────────────────────────────────────────────────────────

/// What kind of value a field carries, with the per-kind layout detail.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FieldKind {
    /// A single continuous value, min/max-normalized.
    Numeric,
    /// A block of shares over a fixed category set, summing to <= 1.
    Compositional { n_shares: usize },
    /// A single class code, one-hot expanded over a fixed enumeration.
    Categorical { categories: Vec<u16> },
}

/// One catalog entry. The catalog is code, not data: it serializes for
/// artifact headers but is never read back from disk.
#[derive(Debug, Clone, Serialize)]
pub struct FieldDef {
    /// Source column code, e.g. "pre_mm_syr".
    pub code: &'static str,
    pub label: &'static str,
    pub band: Band,
    pub kind: FieldKind,
    /// Multiplier applied to raw values on ingest (temperature columns
    /// are stored as °C×10 in the source layer).
    pub scale: f64,
}

impl FieldDef {
    fn numeric(code: &'static str, label: &'static str, band: Band) -> Self {
        FieldDef { code, label, band, kind: FieldKind::Numeric, scale: 1.0 }
    }

    fn numeric_scaled(code: &'static str, label: &'static str, band: Band, scale: f64) -> Self {
        FieldDef { code, label, band, kind: FieldKind::Numeric, scale }
    }

    /// Number of signature columns this field expands to.
    pub fn width(&self) -> usize {
        match &self.kind {
            FieldKind::Numeric => 1,
            FieldKind::Compositional { n_shares } => *n_shares,
            FieldKind::Categorical { categories } => categories.len(),
        }
    }
}

// ── Raw attributes ────────────────────────────────────────────────────────────

/// Raw per-basin attribute values, aligned positionally to the schema:
/// `numeric[i]` belongs to the i-th numeric field, `shares` is the
/// concatenation of all compositional blocks in catalog order, and
/// `categorical[i]` is the code of the i-th categorical field.
/// Missing numeric values are represented as `None` (the source layer
/// has gaps for some attributes in polar and desert basins).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawAttributes {
    pub numeric: Vec<Option<f64>>,
    pub shares: Vec<f64>,
    pub categorical: Vec<u16>,
}

// ── Schema ────────────────────────────────────────────────────────────────────

/// The full ordered catalog: numeric fields, then compositional blocks,
/// then categorical fields.
#[derive(Debug, Clone, Serialize)]
pub struct Schema {
    pub numeric: Vec<FieldDef>,
    pub compositional: Vec<FieldDef>,
    pub categorical: Vec<FieldDef>,
}

/// GLiM major lithology classes.
const LITHOLOGY_CODES: [u16; 16] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16];
/// Terrestrial biome ids.
const BIOME_CODES: [u16; 14] = [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14];
/// GEnZ climate-zone ids.
const CLIMATE_ZONE_CODES: [u16; 18] =
    [1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18];

impl Schema {
    /// The basin08 catalog: 31 numeric fields across bands A–D, the
    /// 15-share potential-natural-vegetation composition, and three
    /// categorical fields.
    pub fn basin08() -> Self {
        use Band::*;
        let numeric = vec![
            // Band A: physiographic bedrock
            FieldDef::numeric("ele_mt_smn", "Elevation min (m)", Physiographic),
            FieldDef::numeric("ele_mt_smx", "Elevation max (m)", Physiographic),
            FieldDef::numeric("slp_dg_sav", "Slope avg (deg)", Physiographic),
            FieldDef::numeric("slp_dg_uav", "Slope upstream (deg)", Physiographic),
            FieldDef::numeric("sgr_dk_sav", "Stream gradient (dm/km)", Physiographic),
            FieldDef::numeric("kar_pc_sse", "Karst extent (%)", Physiographic),
            FieldDef::numeric("kar_pc_use", "Karst upstream (%)", Physiographic),
            // Band B: hydro-climatic baselines
            FieldDef::numeric("dis_m3_pyr", "Discharge (m3/s)", HydroClimatic),
            FieldDef::numeric("dis_m3_pmn", "Discharge min (m3/s)", HydroClimatic),
            FieldDef::numeric("dis_m3_pmx", "Discharge max (m3/s)", HydroClimatic),
            FieldDef::numeric("ria_ha_ssu", "River area (ha)", HydroClimatic),
            FieldDef::numeric("ria_ha_usu", "River area upstream (ha)", HydroClimatic),
            FieldDef::numeric("run_mm_syr", "Runoff (mm/yr)", HydroClimatic),
            FieldDef::numeric("gwt_cm_sav", "Groundwater depth (cm)", HydroClimatic),
            FieldDef::numeric("cly_pc_sav", "Clay (%)", HydroClimatic),
            FieldDef::numeric("slt_pc_sav", "Silt (%)", HydroClimatic),
            FieldDef::numeric("snd_pc_sav", "Sand (%)", HydroClimatic),
            // Band C: bioclimatic proxies
            FieldDef::numeric_scaled("tmp_dc_syr", "Temp annual (degC)", Bioclimatic, 0.1),
            FieldDef::numeric_scaled("tmp_dc_smn", "Temp min (degC)", Bioclimatic, 0.1),
            FieldDef::numeric_scaled("tmp_dc_smx", "Temp max (degC)", Bioclimatic, 0.1),
            FieldDef::numeric("pre_mm_syr", "Precipitation (mm/yr)", Bioclimatic),
            FieldDef::numeric("ari_ix_sav", "Aridity index", Bioclimatic),
            FieldDef::numeric("wet_pc_sg1", "Wetland grp 1 (%)", Bioclimatic),
            FieldDef::numeric("wet_pc_sg2", "Wetland grp 2 (%)", Bioclimatic),
            FieldDef::numeric("prm_pc_sse", "Permafrost extent (%)", Bioclimatic),
            // Band D: anthropogenic markers
            FieldDef::numeric("rev_mc_usu", "Reservoir volume (Mm3)", Anthropogenic),
            FieldDef::numeric("crp_pc_sse", "Cropland extent (%)", Anthropogenic),
            FieldDef::numeric("ppd_pk_sav", "Population density (p/km2)", Anthropogenic),
            FieldDef::numeric("hft_ix_s09", "Human footprint 2009", Anthropogenic),
            FieldDef::numeric("gdp_ud_sav", "GDP (USD)", Anthropogenic),
            FieldDef::numeric("hdi_ix_sav", "Human development index", Anthropogenic),
        ];

        let compositional = vec![FieldDef {
            code: "pnv_pc",
            label: "Potential natural vegetation shares",
            band: Band::Bioclimatic,
            kind: FieldKind::Compositional { n_shares: 15 },
            scale: 1.0,
        }];

        let categorical = vec![
            FieldDef {
                code: "lit_cl_smj",
                label: "Lithology class",
                band: Band::Physiographic,
                kind: FieldKind::Categorical { categories: LITHOLOGY_CODES.to_vec() },
                scale: 1.0,
            },
            FieldDef {
                code: "tbi_cl_smj",
                label: "Biome class",
                band: Band::Bioclimatic,
                kind: FieldKind::Categorical { categories: BIOME_CODES.to_vec() },
                scale: 1.0,
            },
            FieldDef {
                code: "clz_cl_smj",
                label: "Climate zone class",
                band: Band::Bioclimatic,
                kind: FieldKind::Categorical { categories: CLIMATE_ZONE_CODES.to_vec() },
                scale: 1.0,
            },
        ];

        Schema { numeric, compositional, categorical }
    }

    /// Total signature width (all bands).
    pub fn width(&self) -> usize {
        self.width_for(BandSet::full())
    }

    /// Signature width for a band selection.
    pub fn width_for(&self, bands: BandSet) -> usize {
        self.fields()
            .filter(|f| bands.contains(f.band))
            .map(FieldDef::width)
            .sum()
    }

    /// All fields in catalog order: numeric, compositional, categorical.
    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.numeric
            .iter()
            .chain(self.compositional.iter())
            .chain(self.categorical.iter())
    }

    /// Position of a numeric field within the numeric block.
    pub fn numeric_index(&self, code: &str) -> Result<usize> {
        self.numeric
            .iter()
            .position(|f| f.code == code)
            .ok_or_else(|| BasinError::UnknownField(code.to_string()))
    }

    /// Total share count across all compositional blocks.
    pub fn n_shares(&self) -> usize {
        self.compositional.iter().map(FieldDef::width).sum()
    }

    /// Ordered column names for the expanded signature under a band
    /// selection: `n_<code>` for numerics, `<code>_NN` for shares,
    /// `cat_<code>_<id>` for one-hot categoricals.
    pub fn column_names(&self, bands: BandSet) -> Vec<String> {
        let mut names = Vec::with_capacity(self.width_for(bands));
        for f in &self.numeric {
            if bands.contains(f.band) {
                names.push(format!("n_{}", f.code));
            }
        }
        for f in &self.compositional {
            if bands.contains(f.band) {
                for i in 1..=f.width() {
                    names.push(format!("{}_{:02}", f.code, i));
                }
            }
        }
        for f in &self.categorical {
            if bands.contains(f.band) {
                if let FieldKind::Categorical { categories } = &f.kind {
                    for id in categories {
                        names.push(format!("cat_{}_{}", f.code, id));
                    }
                }
            }
        }
        names
    }

    /// Check that attribute vectors are aligned to this catalog.
    pub fn validate(&self, attrs: &RawAttributes) -> Result<()> {
        if attrs.numeric.len() != self.numeric.len() {
            return Err(BasinError::UnknownField(format!(
                "numeric block has {} values, schema defines {}",
                attrs.numeric.len(),
                self.numeric.len()
            )));
        }
        if attrs.shares.len() != self.n_shares() {
            return Err(BasinError::UnknownField(format!(
                "share block has {} values, schema defines {}",
                attrs.shares.len(),
                self.n_shares()
            )));
        }
        if attrs.categorical.len() != self.categorical.len() {
            return Err(BasinError::UnknownField(format!(
                "categorical block has {} values, schema defines {}",
                attrs.categorical.len(),
                self.categorical.len()
            )));
        }
        Ok(())
    }
}
