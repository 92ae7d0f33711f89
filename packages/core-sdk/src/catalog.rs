use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::AssistantError;
use crate::models::{FertilizerSuggestion, VendorLink};

/**
 * \brief 可选植物（固定 12 种）。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PlantType {
    Tomato,
    Wheat,
    Corn,
    Rice,
    Potato,
    Carrot,
    Lettuce,
    Apple,
    Orange,
    Strawberry,
    Cotton,
    Soybean,
}

impl PlantType {
    pub const ALL: [PlantType; 12] = [
        PlantType::Tomato,
        PlantType::Wheat,
        PlantType::Corn,
        PlantType::Rice,
        PlantType::Potato,
        PlantType::Carrot,
        PlantType::Lettuce,
        PlantType::Apple,
        PlantType::Orange,
        PlantType::Strawberry,
        PlantType::Cotton,
        PlantType::Soybean,
    ];

    pub fn value(&self) -> &'static str {
        match self {
            PlantType::Tomato => "tomato",
            PlantType::Wheat => "wheat",
            PlantType::Corn => "corn",
            PlantType::Rice => "rice",
            PlantType::Potato => "potato",
            PlantType::Carrot => "carrot",
            PlantType::Lettuce => "lettuce",
            PlantType::Apple => "apple",
            PlantType::Orange => "orange",
            PlantType::Strawberry => "strawberry",
            PlantType::Cotton => "cotton",
            PlantType::Soybean => "soybean",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            PlantType::Tomato => "Tomato",
            PlantType::Wheat => "Wheat",
            PlantType::Corn => "Corn",
            PlantType::Rice => "Rice",
            PlantType::Potato => "Potato",
            PlantType::Carrot => "Carrot",
            PlantType::Lettuce => "Lettuce",
            PlantType::Apple => "Apple",
            PlantType::Orange => "Orange",
            PlantType::Strawberry => "Strawberry",
            PlantType::Cotton => "Cotton",
            PlantType::Soybean => "Soybean",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            PlantType::Tomato => "🍅",
            PlantType::Wheat | PlantType::Rice => "🌾",
            PlantType::Corn => "🌽",
            PlantType::Potato => "🥔",
            PlantType::Carrot => "🥕",
            PlantType::Lettuce => "🥬",
            PlantType::Apple => "🍎",
            PlantType::Orange => "🍊",
            PlantType::Strawberry => "🍓",
            PlantType::Cotton => "☁️",
            PlantType::Soybean => "🌱",
        }
    }

    /** \brief 按取值解析（忽略大小写与首尾空白）。 */
    pub fn parse(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|p| p.value() == needle)
    }
}

impl fmt::Display for PlantType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/**
 * \brief 可选土壤（固定 6 种），带 pH 范围。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoilType {
    Clay,
    Sandy,
    Loamy,
    Silty,
    Peaty,
    Chalky,
}

impl SoilType {
    pub const ALL: [SoilType; 6] = [
        SoilType::Clay,
        SoilType::Sandy,
        SoilType::Loamy,
        SoilType::Silty,
        SoilType::Peaty,
        SoilType::Chalky,
    ];

    pub fn value(&self) -> &'static str {
        match self {
            SoilType::Clay => "clay",
            SoilType::Sandy => "sandy",
            SoilType::Loamy => "loamy",
            SoilType::Silty => "silty",
            SoilType::Peaty => "peaty",
            SoilType::Chalky => "chalky",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            SoilType::Clay => "Clay Soil",
            SoilType::Sandy => "Sandy Soil",
            SoilType::Loamy => "Loamy Soil",
            SoilType::Silty => "Silty Soil",
            SoilType::Peaty => "Peaty Soil",
            SoilType::Chalky => "Chalky Soil",
        }
    }

    /** \brief (下限, 上限) */
    pub fn ph_range(&self) -> (f32, f32) {
        match self {
            SoilType::Clay | SoilType::Loamy | SoilType::Silty => (6.0, 7.0),
            SoilType::Sandy => (6.0, 7.5),
            SoilType::Peaty => (4.0, 6.0),
            SoilType::Chalky => (7.0, 8.5),
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            SoilType::Clay => "Heavy, nutrient-rich soil with high water retention capacity",
            SoilType::Sandy => "Light, well-draining soil with low water retention",
            SoilType::Loamy => "Ideal balanced soil with good drainage and nutrients",
            SoilType::Silty => "Fine particles with high fertility and moderate drainage",
            SoilType::Peaty => "Organic matter rich, acidic soil with excellent water retention",
            SoilType::Chalky => "Alkaline soil with good drainage but may lack nutrients",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        let needle = raw.trim().to_ascii_lowercase();
        Self::ALL.into_iter().find(|s| s.value() == needle)
    }
}

impl fmt::Display for SoilType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.value())
    }
}

/**
 * \brief 分析请求，仅当植物与土壤都已选定时才可构造。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub plant_type: PlantType,
    pub soil_type: SoilType,
}

impl AnalysisRequest {
    /**
     * \brief 校验并构造请求。
     * \param plant 植物取值，如 "tomato"
     * \param soil  土壤取值，如 "sandy"
     */
    pub fn new(plant: &str, soil: &str) -> Result<Self, AssistantError> {
        if plant.trim().is_empty() {
            return Err(AssistantError::invalid_request("plant type is required"));
        }
        if soil.trim().is_empty() {
            return Err(AssistantError::invalid_request("soil type is required"));
        }
        let plant_type = PlantType::parse(plant).ok_or_else(|| {
            AssistantError::invalid_request(format!("unknown plant type: {}", plant.trim()))
        })?;
        let soil_type = SoilType::parse(soil).ok_or_else(|| {
            AssistantError::invalid_request(format!("unknown soil type: {}", soil.trim()))
        })?;
        Ok(Self {
            plant_type,
            soil_type,
        })
    }
}

/** \brief 目录条目（供前端下拉框使用）。 */
#[derive(Debug, Clone, Serialize)]
pub struct PlantEntry {
    pub value: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct SoilEntry {
    pub value: &'static str,
    pub name: &'static str,
    pub ph_min: f32,
    pub ph_max: f32,
    pub description: &'static str,
}

pub fn plant_entries() -> Vec<PlantEntry> {
    PlantType::ALL
        .iter()
        .map(|p| PlantEntry {
            value: p.value(),
            name: p.display_name(),
            icon: p.icon(),
        })
        .collect()
}

pub fn soil_entries() -> Vec<SoilEntry> {
    SoilType::ALL
        .iter()
        .map(|s| {
            let (ph_min, ph_max) = s.ph_range();
            SoilEntry {
                value: s.value(),
                name: s.display_name(),
                ph_min,
                ph_max,
                description: s.description(),
            }
        })
        .collect()
}

fn vendor(name: &str, link: &str) -> VendorLink {
    VendorLink {
        name: name.to_string(),
        link: link.to_string(),
    }
}

/**
 * \brief 固定的推荐肥料与购买渠道（演示数据）。
 */
pub fn fertilizer_suggestions() -> Vec<FertilizerSuggestion> {
    vec![
        FertilizerSuggestion {
            name: "NPK 15-15-15 Composite Fertilizer".to_string(),
            description: "Ideal for balanced plant growth and development".to_string(),
            price: "$15-25".to_string(),
            vendors: vec![
                vendor("Amazon", "https://amazon.com"),
                vendor("Trendyol", "https://trendyol.com"),
                vendor("Home Depot", "https://homedepot.com"),
            ],
        },
        FertilizerSuggestion {
            name: "Organic Compost Fertilizer".to_string(),
            description: "Natural fertilizer that improves soil structure".to_string(),
            price: "$10-18".to_string(),
            vendors: vec![
                vendor("Amazon", "https://amazon.com"),
                vendor("Garden Center", "#"),
                vendor("Lowes", "#"),
            ],
        },
    ]
}

/** \brief 空会话时展示的快捷问题。 */
pub fn quick_questions() -> &'static [&'static str] {
    &[
        "How often should I fertilize my tomatoes?",
        "What's the best fertilizer for sandy soil?",
        "How do I improve soil pH naturally?",
        "When is the best time to apply fertilizer?",
        "What are signs of over-fertilization?",
        "How to create organic compost?",
    ]
}
