//! Text-derived card enrichment
//!
//! Country detection, topic rewriting, tag extraction and category guessing
//! are driven by the keyword tables below. [`TextEnricher`] takes the tables
//! as data so they can be swapped or extended without touching the logic.

use super::{CardInput, CardPriority, Category};

/// `(canonical name, substrings that indicate it)`
pub type KeywordTable = &'static [(&'static str, &'static [&'static str])];

/// Country gazetteer with common inflected forms
pub const COUNTRIES: KeywordTable = &[
    ("италия", &["италия", "итальянск", "италию", "италией"]),
    ("греция", &["греция", "греческ", "грецию", "грецией"]),
    ("франция", &["франция", "французск", "францию", "францией"]),
    ("испания", &["испания", "испанск", "испанию", "испанией"]),
    ("болгария", &["болгария", "болгарск", "болгарию", "болгарией"]),
    ("великобритания", &["великобритания", "англия", "английск", "великобританию", "англию"]),
    ("сша", &["сша", "америк", "соединенные штаты", "соединенных штатов"]),
    ("япония", &["япония", "японск", "японию", "японией"]),
    ("швейцария", &["швейцария", "швейцарск", "швейцарию", "швейцарией"]),
    ("германия", &["германия", "немецк", "германию", "германией"]),
    ("австрия", &["австрия", "австрийск", "австрию", "австрией"]),
    ("чехия", &["чехия", "чешск", "чехию", "чехией"]),
    ("польша", &["польша", "польск", "польшу", "польшей"]),
    ("португалия", &["португалия", "португальск", "португалию", "португалией"]),
    ("нидерланды", &["нидерланды", "голландия", "голландск", "нидерландов"]),
    ("бельгия", &["бельгия", "бельгийск", "бельгию", "бельгией"]),
    ("дания", &["дания", "датск", "данию", "данией"]),
    ("швеция", &["швеция", "шведск", "швецию", "швецией"]),
    ("норвегия", &["норвегия", "норвежск", "норвегию", "норвегией"]),
    ("финляндия", &["финляндия", "финск", "финляндию", "финляндией"]),
    ("исландия", &["исландия", "исландск", "исландию", "исландией"]),
    ("мальта", &["мальта", "мальтийск", "мальту", "мальтой"]),
    ("кипр", &["кипр", "кипрск", "кипре", "кипром"]),
];

/// Tags attached to free-text cards
pub const TAG_KEYWORDS: KeywordTable = &[
    ("виза", &["виза", "визы", "визовый"]),
    ("шенген", &["шенген", "шенгенская"]),
    ("документы", &["документ", "паспорт", "справка"]),
    ("стоимость", &["стоимость", "цена", "тариф", "оплат"]),
    ("сроки", &["срок", "день", "недел", "месяц"]),
];

/// Category buckets in match order; the first hit wins
pub const CATEGORY_KEYWORDS: &[(Category, &[&str])] = &[
    (Category::OtherVisas, &["виза", "шенген", "италия", "греция", "франция", "испания"]),
    (Category::Documents, &["документ", "паспорт", "справка"]),
    (Category::Cost, &["стоимость", "цена", "тариф", "оплат"]),
    (Category::Timelines, &["срок", "день", "недел", "месяц"]),
    (Category::Process, &["процесс", "оформлен", "подач"]),
    (Category::SpecialConditions, &["условие", "ограничен", "особ"]),
];

/// Markers that promote a visa topic to the Schengen bucket
pub const SCHENGEN_MARKERS: &[&str] = &["шенген", "италия", "греция", "франция", "испания"];

/// Topic used for text that appears before any header
pub const DEFAULT_TEXT_TOPIC: &str = "Общая информация";

/// Keyword-table driven enrichment
#[derive(Debug, Clone, Copy)]
pub struct TextEnricher {
    pub countries: KeywordTable,
    pub tags: KeywordTable,
    pub categories: &'static [(Category, &'static [&'static str])],
    pub schengen_markers: &'static [&'static str],
}

impl Default for TextEnricher {
    fn default() -> Self {
        Self {
            countries: COUNTRIES,
            tags: TAG_KEYWORDS,
            categories: CATEGORY_KEYWORDS,
            schengen_markers: SCHENGEN_MARKERS,
        }
    }
}

impl TextEnricher {
    /// First country whose patterns occur in `text`
    pub fn detect_country(&self, text: &str) -> Option<&'static str> {
        let text = text.trim().to_lowercase();
        self.countries
            .iter()
            .find(|(_, patterns)| patterns.iter().any(|p| text.contains(p)))
            .map(|(country, _)| *country)
    }

    /// Rewrite a country-less topic so it names `country`
    pub fn enrich_topic(&self, topic: &str, country: Option<&str>) -> String {
        let Some(country) = country else {
            return topic.to_string();
        };
        if topic.is_empty() || self.detect_country(topic).is_some() {
            return topic.to_string();
        }
        let lower = topic.trim().to_lowercase();
        let name = capitalize(country);

        if lower.starts_with("требования к документам") {
            format!("Требования к документам для визы в {}", name)
        } else if lower.starts_with("стоимость") {
            format!("Стоимость визы в {}", name)
        } else if lower.starts_with("срок") {
            if lower.contains("рассмотрен") || lower.contains("оформлен") {
                format!("Сроки рассмотрения визы в {}", name)
            } else {
                format!("Сроки оформления визы в {}", name)
            }
        } else if lower.starts_with("особые условия") || lower.starts_with("условия") {
            format!("Особые условия для визы в {}", name)
        } else if lower.starts_with("документы") {
            format!("Документы для визы в {}", name)
        } else if lower.contains("виза") {
            format!("{} в {}", topic, name)
        } else {
            format!("{} (виза в {})", topic, name)
        }
    }

    /// Country plus keyword tags found in `text`
    pub fn extract_tags(&self, text: &str) -> Vec<String> {
        let lower = text.trim().to_lowercase();
        let mut tags = Vec::new();
        if let Some(country) = self.detect_country(&lower) {
            tags.push(country.to_string());
        }
        for (tag, patterns) in self.tags {
            if patterns.iter().any(|p| lower.contains(p)) {
                tags.push(tag.to_string());
            }
        }
        tags
    }

    pub fn guess_category(&self, topic: &str) -> Category {
        let lower = topic.trim().to_lowercase();
        for (category, keywords) in self.categories {
            if !keywords.iter().any(|k| lower.contains(k)) {
                continue;
            }
            if *category == Category::OtherVisas
                && self.schengen_markers.iter().any(|m| lower.contains(m))
            {
                return Category::SchengenVisas;
            }
            return *category;
        }
        Category::General
    }

    /// Split structured admin text into card inputs
    ///
    /// Paragraphs are separated by blank lines. A paragraph whose first line
    /// looks like a heading opens a new topic and its remaining lines become
    /// facts; other paragraphs are facts of the current topic (bullet lists
    /// are split per line).
    pub fn parse_text(&self, text: &str) -> Vec<CardInput> {
        let mut cards = Vec::new();
        let mut topic: Option<String> = None;
        let mut facts: Vec<String> = Vec::new();
        let mut country: Option<&'static str> = None;

        for para in text.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let (first, rest) = match para.split_once('\n') {
                Some((first, rest)) => (first.trim(), rest.trim()),
                None => (para, ""),
            };
            let body = if is_header(first) {
                if let Some(current) = topic.take() {
                    self.push_card(&mut cards, &current, std::mem::take(&mut facts), country);
                }
                let heading = first.replace(['#', ':'], "").trim().to_string();
                country = self.detect_country(&heading);
                topic = Some(heading);
                facts.clear();
                if rest.is_empty() {
                    continue;
                }
                facts.extend(bullet_lines(rest));
                rest
            } else {
                if topic.is_none() {
                    topic = Some(DEFAULT_TEXT_TOPIC.to_string());
                }
                if para.starts_with('-') || para.starts_with('•') {
                    facts.extend(bullet_lines(para));
                } else {
                    facts.push(para.to_string());
                }
                para
            };
            if country.is_none() {
                country = self.detect_country(body);
            }
        }
        if let Some(current) = topic {
            self.push_card(&mut cards, &current, facts, country);
        }
        cards
    }

    fn push_card(
        &self,
        cards: &mut Vec<CardInput>,
        topic: &str,
        facts: Vec<String>,
        country: Option<&str>,
    ) {
        if topic.is_empty() || facts.is_empty() {
            return;
        }
        let topic = self.enrich_topic(topic, country);
        let tags = self.extract_tags(&format!("{} {}", topic, facts.join(" ")));
        let category = self.guess_category(&topic);
        cards.push(
            CardInput::new(topic, facts)
                .with_tags(tags)
                .with_category(category)
                .with_priority(CardPriority::Medium),
        );
    }
}

/// Short, non-bullet and heading-like
fn is_header(line: &str) -> bool {
    if line.starts_with('-') || line.starts_with('•') {
        return false;
    }
    if line.chars().count() >= 100 {
        return false;
    }
    let head: String = line.chars().take(50).collect();
    line.ends_with(':') || !head.contains('.') || line.starts_with('#') || is_upper(line)
}

/// Lines with `-`/`•` markers stripped, empty lines dropped
fn bullet_lines(text: &str) -> impl Iterator<Item = String> + '_ {
    text.lines()
        .map(|line| line.trim().trim_start_matches(['-', '•']).trim())
        .filter(|line| !line.is_empty())
        .map(str::to_string)
}

fn is_upper(text: &str) -> bool {
    text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
