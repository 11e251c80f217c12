use std::collections::BTreeSet;
use std::sync::LazyLock;

use nearby_core::{CategoryBucket, SubCategory};
use regex::Regex;

static BAR_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(bar|pub|taproom|tavern|brewery)\b").expect("valid regex"));

/// Name hints consulted only when no category token says anything specific.
static NAME_HINTS: LazyLock<Vec<(Regex, SubCategory)>> = LazyLock::new(|| {
    [
        (r"(?i)coffee|espresso", SubCategory::Coffee),
        (r"(?i)\bcaf[eé]\b", SubCategory::Cafe),
        (r"(?i)bakery|patisserie|boulangerie", SubCategory::Bakery),
        (r"(?i)\b(pizza|pizzeria|grill|kitchen|diner|restaurant)\b", SubCategory::Restaurant),
        (r"(?i)\b(bar|pub|taproom|tavern|brewery)\b", SubCategory::Bar),
        (r"(?i)\b(park|garden|gardens)\b", SubCategory::Park),
        (r"(?i)\b(museum|gallery|library)\b", SubCategory::Arts),
    ]
    .into_iter()
    .map(|(pattern, sub)| (Regex::new(pattern).expect("valid regex"), sub))
    .collect()
});

const FOOD_DRINK_PRIORITY: [SubCategory; 6] = [
    SubCategory::Coffee,
    SubCategory::Cafe,
    SubCategory::Bakery,
    SubCategory::FastFood,
    SubCategory::Restaurant,
    SubCategory::Bar,
];

const OTHER_PRIORITY: [SubCategory; 6] = [
    SubCategory::Park,
    SubCategory::Outdoors,
    SubCategory::Arts,
    SubCategory::Activities,
    SubCategory::Wellness,
    SubCategory::Shopping,
];

/// Lower-cases and keeps only alphanumeric characters.
pub fn normalize_token(token: &str) -> String {
    token
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

fn bucket_alias(key: &str) -> Option<CategoryBucket> {
    let bucket = match key {
        "restaurant" | "restaurants" | "bar" | "bars" | "pub" | "pubs" | "bakery" | "bakeries" | "food"
        | "pizza" | "burgers" | "mealtakeaway" | "mealdelivery" | "fastfood" | "diner" | "diners"
        | "drinks" | "brewery" | "breweries" | "4d4b7105d754a06374d81259" => CategoryBucket::FoodDrink,
        "cafe" | "cafes" | "café" | "coffee" | "coffeeshop" | "coffeeshops" | "tea" | "wifi" | "wfh"
        | "work" | "4bf58dd8d48988d1e0931735" => CategoryBucket::CoffeeWfh,
        "park" | "parks" | "campground" | "campgrounds" | "touristattraction" | "zoo" | "zoos"
        | "naturalfeature" | "hiking" | "trail" | "trails" | "garden" | "gardens" | "outdoor"
        | "outdoors" | "nature" | "4bf58dd8d48988d163941735" => CategoryBucket::Outdoors,
        "museum" | "museums" | "artgallery" | "gallery" | "galleries" | "library" | "libraries" | "art"
        | "arts" | "culture" | "theater" | "theatre" | "4bf58dd8d48988d181941735" => {
            CategoryBucket::ArtsCulture
        }
        "movietheater" | "movietheaters" | "cinema" | "bowlingalley" | "bowling" | "amusementpark"
        | "amusementparks" | "aquarium" | "aquariums" | "stadium" | "stadiumsarenas" | "casino"
        | "casinos" | "arcade" | "arcades" | "activities" | "play" | "4bf58dd8d48988d17f941735" => {
            CategoryBucket::Activities
        }
        "shoppingmall" | "store" | "supermarket" | "groceryorsupermarket" | "hardwarestore"
        | "shopping" | "grocery" | "hardware" | "shops" | "services" | "bookstore" | "bookstores"
        | "mall" | "4bf58dd8d48988d1fd941735" | "4bf58dd8d48988d1f9941735" => CategoryBucket::ShopsServices,
        "spa" | "spas" | "yoga" | "gym" | "gyms" | "fitness" | "fitnesscentre" | "wellness" | "massage" => {
            CategoryBucket::Wellness
        }
        "general" => CategoryBucket::General,
        _ => return None,
    };
    Some(bucket)
}

/// Maps any query or provider token to a bucket; unknown tokens land in `general`.
pub fn resolve_bucket(token: &str) -> CategoryBucket {
    let key = normalize_token(token);
    CategoryBucket::ALL
        .into_iter()
        .find(|bucket| normalize_token(bucket.as_str()) == key)
        .or_else(|| bucket_alias(&key))
        .unwrap_or(CategoryBucket::General)
}

/// Distinct buckets in first-seen order; blank input yields `[general]`.
pub fn resolve_buckets<S: AsRef<str>>(tokens: &[S]) -> Vec<CategoryBucket> {
    let mut out = Vec::new();
    for token in tokens.iter().map(AsRef::as_ref).filter(|t| !t.trim().is_empty()) {
        let bucket = resolve_bucket(token);
        if !out.contains(&bucket) {
            out.push(bucket);
        }
    }
    if out.is_empty() {
        out.push(CategoryBucket::General);
    }
    out
}

fn sub_category_alias(key: &str) -> Option<SubCategory> {
    let sub = match key {
        "coffee" | "coffeeshop" | "coffeeshops" | "espressobar" | "coffeewifi" | "wificoffee"
        | "coffeeroasteries" | "coffeeroaster" => SubCategory::Coffee,
        "cafe" | "cafes" | "café" | "tearoom" | "tearooms" => SubCategory::Cafe,
        "bakery" | "bakeries" | "dessertshop" | "patisserie" | "pastry" | "donuts" => SubCategory::Bakery,
        "fastfood" | "quickbites" | "hotdogs" | "foodcourt" => SubCategory::FastFood,
        "restaurant" | "restaurants" | "pizza" | "sandwichshop" | "sandwiches" | "diner" | "diners"
        | "tradamerican" | "newamerican" | "food" => SubCategory::Restaurant,
        "bar" | "bars" | "pub" | "pubs" | "taproom" | "gastropub" | "brewpub" | "brewery"
        | "breweries" | "cocktailbars" | "winebars" | "biergarten" => SubCategory::Bar,
        "park" | "parks" | "dogpark" | "dogparks" | "garden" | "gardens" | "playground" => SubCategory::Park,
        "outdoors" | "hiking" | "trail" | "trails" | "naturereserve" | "viewpoint" | "campground"
        | "picnicsite" | "beach" | "beaches" => SubCategory::Outdoors,
        "arts" | "museum" | "museums" | "gallery" | "galleries" | "artgallery" | "library" | "libraries"
        | "theatre" | "theater" | "artscentre" | "artwork" => SubCategory::Arts,
        "activities" | "cinema" | "movietheater" | "movietheaters" | "bowling" | "bowlingalley"
        | "arcade" | "arcades" | "amusementarcade" | "sportscentre" | "escapegame" | "miniaturegolf" => {
            SubCategory::Activities
        }
        "wellness" | "spa" | "spas" | "yoga" | "gym" | "gyms" | "fitness" | "fitnesscentre" | "massage"
        | "sauna" | "beauty" => SubCategory::Wellness,
        "shopping" | "books" | "bookstore" | "bookstores" | "mall" | "departmentstore" | "gift"
        | "clothes" | "supermarket" | "market" | "marketplace" => SubCategory::Shopping,
        "general" => SubCategory::General,
        _ => return None,
    };
    Some(sub)
}

fn infer_sub_category(key: &str) -> SubCategory {
    if key.contains("coffee") {
        SubCategory::Coffee
    } else if key.contains("cafe") {
        SubCategory::Cafe
    } else if key.contains("bakery") {
        SubCategory::Bakery
    } else if key.contains("fast") {
        SubCategory::FastFood
    } else if key.contains("restaurant") || key.contains("diner") {
        SubCategory::Restaurant
    } else if key.contains("bar") || key.contains("pub") {
        SubCategory::Bar
    } else if key.contains("park") {
        SubCategory::Park
    } else if key.contains("outdoor") {
        SubCategory::Outdoors
    } else if key.contains("museum") || key.contains("gallery") {
        SubCategory::Arts
    } else {
        SubCategory::General
    }
}

/// Canonical sub-categories present in a raw token list, via alias table then substring inference.
pub fn sub_categories<S: AsRef<str>>(raw: &[S]) -> BTreeSet<SubCategory> {
    raw.iter()
        .map(|token| normalize_token(token.as_ref()))
        .filter(|key| !key.is_empty())
        .map(|key| sub_category_alias(&key).unwrap_or_else(|| infer_sub_category(&key)))
        .collect()
}

/// Picks exactly one sub-category. The result depends only on the set of
/// tokens and the name, never on token order.
pub fn pick_primary_category<S: AsRef<str>>(raw: &[S], name: Option<&str>) -> SubCategory {
    let present = sub_categories(raw);
    let name = name.unwrap_or_default();

    if present.contains(&SubCategory::Restaurant)
        && present.contains(&SubCategory::Bar)
        && BAR_NAME.is_match(name)
    {
        return SubCategory::Bar;
    }

    if let Some(sub) = FOOD_DRINK_PRIORITY
        .iter()
        .chain(OTHER_PRIORITY.iter())
        .find(|sub| present.contains(sub))
    {
        return *sub;
    }

    NAME_HINTS
        .iter()
        .find(|(re, _)| re.is_match(name))
        .map(|(_, sub)| *sub)
        .unwrap_or(SubCategory::General)
}
