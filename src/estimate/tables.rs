use super::ResaleDifficulty;
use crate::normalize::StandardCondition;

#[derive(Debug, Clone, Copy)]
pub struct CategoryProfile {
    pub key: &'static str,
    pub label: &'static str,
    pub aliases: &'static [&'static str],
    pub keywords: &'static [&'static str],
    pub low_multiplier: f64,
    pub high_multiplier: f64,
    pub base_difficulty: ResaleDifficulty,
}

pub static GENERIC_CATEGORY: CategoryProfile = CategoryProfile {
    key: "general",
    label: "General Merchandise",
    aliases: &["general", "other", "misc", "unknown"],
    keywords: &[],
    low_multiplier: 1.2,
    high_multiplier: 1.8,
    base_difficulty: ResaleDifficulty::Moderate,
};

pub static CATEGORIES: [CategoryProfile; 12] = [
    CategoryProfile {
        key: "electronics",
        label: "Electronics",
        aliases: &["electronics", "cell phones", "phones", "computers", "audio", "cameras"],
        keywords: &[
            "iphone", "ipad", "macbook", "laptop", "headphones", "airpods", "camera", "monitor",
            "speaker", "tablet",
        ],
        low_multiplier: 1.2,
        high_multiplier: 1.8,
        base_difficulty: ResaleDifficulty::Easy,
    },
    CategoryProfile {
        key: "video_games",
        label: "Video Games & Consoles",
        aliases: &["video games", "video_games", "gaming", "consoles"],
        keywords: &[
            "nintendo switch", "playstation", "ps5", "ps4", "xbox", "game boy", "console",
        ],
        low_multiplier: 1.3,
        high_multiplier: 2.0,
        base_difficulty: ResaleDifficulty::VeryEasy,
    },
    CategoryProfile {
        key: "collectibles",
        label: "Collectibles",
        aliases: &["collectibles", "trading cards", "antiques", "memorabilia"],
        keywords: &["pokemon", "trading card", "funko", "comic", "figurine", "coin"],
        low_multiplier: 1.5,
        high_multiplier: 3.0,
        base_difficulty: ResaleDifficulty::Moderate,
    },
    CategoryProfile {
        key: "clothing",
        label: "Clothing, Shoes & Accessories",
        aliases: &["clothing", "shoes", "apparel", "fashion", "accessories"],
        keywords: &["jacket", "sneakers", "shoes", "dress", "jeans", "hoodie", "handbag"],
        low_multiplier: 1.3,
        high_multiplier: 2.5,
        base_difficulty: ResaleDifficulty::Moderate,
    },
    CategoryProfile {
        key: "furniture",
        label: "Furniture",
        aliases: &["furniture", "home", "home & garden"],
        keywords: &["sofa", "couch", "dresser", "dining table", "armchair", "desk", "bookshelf"],
        low_multiplier: 1.4,
        high_multiplier: 2.5,
        base_difficulty: ResaleDifficulty::Hard,
    },
    CategoryProfile {
        key: "tools",
        label: "Tools",
        aliases: &["tools", "power tools", "hardware"],
        keywords: &["drill", "impact driver", "circular saw", "table saw", "toolbox", "sander"],
        low_multiplier: 1.3,
        high_multiplier: 2.0,
        base_difficulty: ResaleDifficulty::Easy,
    },
    CategoryProfile {
        key: "appliances",
        label: "Appliances",
        aliases: &["appliances", "kitchen"],
        keywords: &["refrigerator", "washer", "dryer", "microwave", "vacuum", "stand mixer"],
        low_multiplier: 1.2,
        high_multiplier: 1.8,
        base_difficulty: ResaleDifficulty::Hard,
    },
    CategoryProfile {
        key: "sports",
        label: "Sporting Goods",
        aliases: &["sports", "sporting goods", "outdoors", "fitness"],
        keywords: &["bike", "bicycle", "golf", "kayak", "treadmill", "dumbbell", "snowboard"],
        low_multiplier: 1.3,
        high_multiplier: 2.0,
        base_difficulty: ResaleDifficulty::Moderate,
    },
    CategoryProfile {
        key: "toys",
        label: "Toys & Hobbies",
        aliases: &["toys", "hobbies", "toys & games"],
        keywords: &["lego", "action figure", "doll", "playset", "rc car", "model train"],
        low_multiplier: 1.3,
        high_multiplier: 2.2,
        base_difficulty: ResaleDifficulty::Moderate,
    },
    CategoryProfile {
        key: "musical_instruments",
        label: "Musical Instruments",
        aliases: &["musical instruments", "music", "instruments"],
        keywords: &["guitar", "bass", "piano", "keyboard", "amplifier", "drum", "violin"],
        low_multiplier: 1.3,
        high_multiplier: 2.0,
        base_difficulty: ResaleDifficulty::Moderate,
    },
    CategoryProfile {
        key: "jewelry",
        label: "Jewelry & Watches",
        aliases: &["jewelry", "watches", "jewelry & watches"],
        keywords: &["ring", "necklace", "bracelet", "watch", "earrings", "14k", "sterling"],
        low_multiplier: 1.5,
        high_multiplier: 3.0,
        base_difficulty: ResaleDifficulty::Hard,
    },
    CategoryProfile {
        key: "books",
        label: "Books & Media",
        aliases: &["books", "media", "vinyl", "records"],
        keywords: &["hardcover", "paperback", "vinyl", "first printing", "box set"],
        low_multiplier: 1.2,
        high_multiplier: 2.5,
        base_difficulty: ResaleDifficulty::Hard,
    },
];

pub fn condition_multiplier(condition: StandardCondition) -> f64 {
    match condition {
        StandardCondition::New => 1.15,
        StandardCondition::LikeNew => 1.05,
        StandardCondition::VeryGood => 1.0,
        StandardCondition::Good => 0.9,
        StandardCondition::Acceptable => 0.75,
        StandardCondition::Poor => 0.5,
    }
}

/// Pattern, multiplier, tag. Each pattern counts at most once per listing.
pub const VALUE_PATTERNS: [(&str, f64, &str); 5] = [
    (
        r"\b(apple|sony|samsung|nintendo|dyson|bose|canon|nikon|dewalt|milwaukee|lego|nike|adidas|patagonia|herman miller|rolex|fender|gibson|kitchenaid|yeti)\b",
        1.15,
        "brand_name",
    ),
    (
        r"\b(premium|pro|professional|designer|luxury|high[- ]end)\b",
        1.1,
        "premium",
    ),
    (r"\b(vintage|antique|retro|mid[- ]century)\b", 1.2, "vintage"),
    (
        r"\b(sealed|new in box|nib|nwt|unopened|factory sealed)\b",
        1.25,
        "sealed",
    ),
    (
        r"\b(rare|limited edition|collector'?s|first edition|discontinued)\b",
        1.3,
        "rare",
    ),
];

pub const RISK_PATTERNS: [(&str, f64, &str); 3] = [
    (
        r"\b(damaged|broken|cracked|for parts|not working|doesn'?t work|as[- ]is)\b",
        0.5,
        "damaged",
    ),
    (
        r"\b(incomplete|missing|no (charger|remote|cables?|controller|box))\b",
        0.8,
        "incomplete",
    ),
    (
        r"\b(heavy wear|heavily used|scratch(es|ed)?|stain(s|ed)?|worn|dent(s|ed)?|faded)\b",
        0.85,
        "heavy_wear",
    ),
];

pub const NEGOTIABLE_PATTERN: &str =
    r"\b(obo|o\.b\.o|or best offer|negotiable|make (me )?an offer|open to offers)\b";

pub const FIRM_PATTERN: &str = r"(\bprice is firm\b|\bfirm on (the )?price\b|\bfirm price\b|\$?\d+ firm\b)";

pub const PICKUP_ONLY_PATTERN: &str = r"\b(pick[- ]?up only|local pick[- ]?up only|local only|no shipping|will not ship|won'?t ship|cash and carry)\b";

pub const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "the", "for", "with", "in", "of", "on", "to", "new", "used", "like",
    "great", "good", "excellent", "condition", "obo", "sale", "selling", "only", "works",
    "working", "must", "go", "pickup", "pick", "up", "local", "free", "shipping", "firm",
];

pub const QUERY_MAX_WORDS: usize = 6;
pub const QUERY_MAX_CHARS: usize = 80;
