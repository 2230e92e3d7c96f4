//! Category classification
//!
//! Maps a structured place category code, or failing that free text, onto a
//! small fixed set of labels. Pure and total.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// User-facing place category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Category {
    Food,
    Cafe,
    Entertainment,
    Shopping,
    Travel,
    Health,
    Services,
    Nature,
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Food,
        Category::Cafe,
        Category::Entertainment,
        Category::Shopping,
        Category::Travel,
        Category::Health,
        Category::Services,
        Category::Nature,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Food => "Food",
            Category::Cafe => "Cafe",
            Category::Entertainment => "Entertainment",
            Category::Shopping => "Shopping",
            Category::Travel => "Travel",
            Category::Health => "Health",
            Category::Services => "Services",
            Category::Nature => "Nature",
            Category::Other => "Other",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Category::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown category '{s}'"))
    }
}

/// Structured category code supplied by the nearby-place search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum PoiCategory {
    Restaurant,
    Bakery,
    Brewery,
    Winery,
    FoodMarket,
    Cafe,
    Nightlife,
    MovieTheater,
    Theater,
    Museum,
    Stadium,
    AmusementPark,
    Aquarium,
    Zoo,
    Store,
    Airport,
    Hotel,
    PublicTransport,
    CarRental,
    Hospital,
    Pharmacy,
    FitnessCenter,
    Bank,
    Atm,
    PostOffice,
    Police,
    FireStation,
    Laundry,
    Parking,
    GasStation,
    EvCharger,
    School,
    University,
    Library,
    Park,
    NationalPark,
    Beach,
    Campground,
    Marina,
    Restroom,
    /// Any code not in the table
    Unlisted,
}

const POI_CODES: &[(&str, PoiCategory)] = &[
    ("restaurant", PoiCategory::Restaurant),
    ("bakery", PoiCategory::Bakery),
    ("brewery", PoiCategory::Brewery),
    ("winery", PoiCategory::Winery),
    ("foodMarket", PoiCategory::FoodMarket),
    ("cafe", PoiCategory::Cafe),
    ("nightlife", PoiCategory::Nightlife),
    ("movieTheater", PoiCategory::MovieTheater),
    ("theater", PoiCategory::Theater),
    ("museum", PoiCategory::Museum),
    ("stadium", PoiCategory::Stadium),
    ("amusementPark", PoiCategory::AmusementPark),
    ("aquarium", PoiCategory::Aquarium),
    ("zoo", PoiCategory::Zoo),
    ("store", PoiCategory::Store),
    ("airport", PoiCategory::Airport),
    ("hotel", PoiCategory::Hotel),
    ("publicTransport", PoiCategory::PublicTransport),
    ("carRental", PoiCategory::CarRental),
    ("hospital", PoiCategory::Hospital),
    ("pharmacy", PoiCategory::Pharmacy),
    ("fitnessCenter", PoiCategory::FitnessCenter),
    ("bank", PoiCategory::Bank),
    ("atm", PoiCategory::Atm),
    ("postOffice", PoiCategory::PostOffice),
    ("police", PoiCategory::Police),
    ("fireStation", PoiCategory::FireStation),
    ("laundry", PoiCategory::Laundry),
    ("parking", PoiCategory::Parking),
    ("gasStation", PoiCategory::GasStation),
    ("evCharger", PoiCategory::EvCharger),
    ("school", PoiCategory::School),
    ("university", PoiCategory::University),
    ("library", PoiCategory::Library),
    ("park", PoiCategory::Park),
    ("nationalPark", PoiCategory::NationalPark),
    ("beach", PoiCategory::Beach),
    ("campground", PoiCategory::Campground),
    ("marina", PoiCategory::Marina),
    ("restroom", PoiCategory::Restroom),
];

impl PoiCategory {
    /// Parse a service code. Unknown codes become [`PoiCategory::Unlisted`].
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        let code = code.strip_prefix("MKPOICategory").unwrap_or(code);
        POI_CODES
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(code))
            .map(|(_, poi)| *poi)
            .unwrap_or(PoiCategory::Unlisted)
    }

    pub fn code(&self) -> &'static str {
        POI_CODES
            .iter()
            .find(|(_, poi)| poi == self)
            .map(|(name, _)| *name)
            .unwrap_or("unlisted")
    }

    /// Fixed lookup from structured code to label
    pub fn category(&self) -> Category {
        use PoiCategory::*;
        match self {
            Restaurant | Bakery | Brewery | Winery | FoodMarket => Category::Food,
            Cafe => Category::Cafe,
            Nightlife | MovieTheater | Theater | Museum | Stadium | AmusementPark | Aquarium
            | Zoo => Category::Entertainment,
            Store => Category::Shopping,
            Airport | Hotel | PublicTransport | CarRental => Category::Travel,
            Hospital | Pharmacy | FitnessCenter => Category::Health,
            Bank | Atm | PostOffice | Police | FireStation | Laundry | Parking | GasStation
            | EvCharger | School | University | Library => Category::Services,
            Park | NationalPark | Beach | Campground | Marina => Category::Nature,
            Restroom | Unlisted => Category::Other,
        }
    }
}

impl From<String> for PoiCategory {
    fn from(code: String) -> Self {
        PoiCategory::from_code(&code)
    }
}

impl From<PoiCategory> for String {
    fn from(poi: PoiCategory) -> Self {
        poi.code().to_string()
    }
}

const FOOD_KEYWORDS: &[&str] = &[
    "restaurant", "pizza", "pizzeria", "kitchen", "grill", "burger", "burgers", "sushi", "taco",
    "tacos", "taqueria", "diner", "bistro", "bbq", "barbecue", "noodle", "noodles", "ramen", "pho",
    "deli", "bakery", "steakhouse", "trattoria", "eatery", "food", "wings", "curry", "kebab",
    "bagel", "bagels", "donut", "donuts", "chicken", "dumpling", "dumplings", "cantina",
];

const CAFE_KEYWORDS: &[&str] = &[
    "cafe", "café", "coffee", "espresso", "tea", "teahouse", "roasters", "roastery", "latte",
    "boba", "patisserie",
];

const ENTERTAINMENT_KEYWORDS: &[&str] = &[
    "cinema", "theater", "theatre", "bar", "pub", "club", "lounge", "arcade", "bowling",
    "karaoke", "museum", "gallery", "casino", "tavern", "comedy",
];

const SHOPPING_KEYWORDS: &[&str] = &[
    "store", "shop", "market", "mall", "boutique", "outlet", "mart", "supermarket", "grocery",
    "bookstore", "books", "emporium", "apparel",
];

const TRAVEL_KEYWORDS: &[&str] = &[
    "hotel", "inn", "motel", "hostel", "resort", "airport", "station", "terminal", "rental",
    "suites", "lodge",
];

/// Keyword sets in priority order; the first set with a matching word wins
const KEYWORD_SETS: [(Category, &[&str]); 5] = [
    (Category::Food, FOOD_KEYWORDS),
    (Category::Cafe, CAFE_KEYWORDS),
    (Category::Entertainment, ENTERTAINMENT_KEYWORDS),
    (Category::Shopping, SHOPPING_KEYWORDS),
    (Category::Travel, TRAVEL_KEYWORDS),
];

/// Classify free text by whole-word keyword membership
pub fn categorize_text(text: &str) -> Category {
    let lowered = text.to_lowercase();
    let words: Vec<&str> = lowered
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect();

    KEYWORD_SETS
        .iter()
        .find(|(_, keywords)| words.iter().any(|w| keywords.contains(w)))
        .map(|(category, _)| *category)
        .unwrap_or(Category::Other)
}

/// Structured code wins when present; otherwise keywords over `text`; otherwise Other
pub fn categorize(structured: Option<PoiCategory>, text: Option<&str>) -> Category {
    match (structured, text) {
        (Some(poi), _) => poi.category(),
        (None, Some(text)) => categorize_text(text),
        (None, None) => Category::Other,
    }
}
