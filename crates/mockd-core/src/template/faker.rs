//! Faker catalog backing the `{{faker.*}}` template tokens

use fake::faker::address::en::{CityName, CountryName, StreetName, TimeZone, ZipCode};
use fake::faker::company::en::CompanyName;
use fake::faker::creditcard::en::CreditCardNumber;
use fake::faker::currency::en::CurrencyCode;
use fake::faker::internet::en::{
    DomainSuffix, FreeEmail, IPv4, IPv6, MACAddress, UserAgent, Username,
};
use fake::faker::job::en::Title;
use fake::faker::lorem::en::{Paragraph, Sentence, Word};
use fake::faker::name::en::{FirstName, LastName, Name};
use fake::faker::phone_number::en::CellNumber;
use fake::Fake;
use rand::Rng;

/// The supported faker kinds; parsed from the token name after `faker.`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FakerKind {
    Name,
    FirstName,
    LastName,
    Email,
    Username,
    Phone,
    Address,
    City,
    Country,
    ZipCode,
    Company,
    JobTitle,
    Ipv4,
    Ipv6,
    Mac,
    UserAgent,
    Url,
    Domain,
    Uuid,
    Word,
    Sentence,
    Paragraph,
    CreditCard,
    CurrencyCode,
    Color,
    HexColor,
    Latitude,
    Longitude,
    Boolean,
    Digit,
    Month,
    Weekday,
    Timezone,
    Semver,
}

impl FakerKind {
    /// Parse the name used in templates, e.g. `email` in `{{faker.email}}`
    pub fn parse(name: &str) -> Option<Self> {
        let kind = match name {
            "name" => Self::Name,
            "firstName" => Self::FirstName,
            "lastName" => Self::LastName,
            "email" => Self::Email,
            "username" => Self::Username,
            "phone" => Self::Phone,
            "address" => Self::Address,
            "city" => Self::City,
            "country" => Self::Country,
            "zipCode" => Self::ZipCode,
            "company" => Self::Company,
            "jobTitle" => Self::JobTitle,
            "ipv4" => Self::Ipv4,
            "ipv6" => Self::Ipv6,
            "mac" => Self::Mac,
            "userAgent" => Self::UserAgent,
            "url" => Self::Url,
            "domain" => Self::Domain,
            "uuid" => Self::Uuid,
            "word" => Self::Word,
            "sentence" => Self::Sentence,
            "paragraph" => Self::Paragraph,
            "creditCard" => Self::CreditCard,
            "currencyCode" => Self::CurrencyCode,
            "color" => Self::Color,
            "hexColor" => Self::HexColor,
            "latitude" => Self::Latitude,
            "longitude" => Self::Longitude,
            "boolean" => Self::Boolean,
            "digit" => Self::Digit,
            "month" => Self::Month,
            "weekday" => Self::Weekday,
            "timezone" => Self::Timezone,
            "semver" => Self::Semver,
            _ => return None,
        };
        Some(kind)
    }
}

const COLORS: &[&str] = &[
    "red", "blue", "green", "yellow", "purple", "orange", "pink", "brown", "black", "white",
];

const MONTHS: &[&str] = &[
    "January", "February", "March", "April", "May", "June", "July", "August", "September",
    "October", "November", "December",
];

const WEEKDAYS: &[&str] = &[
    "Monday", "Tuesday", "Wednesday", "Thursday", "Friday", "Saturday", "Sunday",
];

/// Generate a value for the given kind. Never fails; every kind yields a
/// plausible string.
pub fn generate(kind: FakerKind) -> String {
    let mut rng = rand::rng();
    match kind {
        FakerKind::Name => Name().fake(),
        FakerKind::FirstName => FirstName().fake(),
        FakerKind::LastName => LastName().fake(),
        FakerKind::Email => FreeEmail().fake(),
        FakerKind::Username => Username().fake(),
        FakerKind::Phone => CellNumber().fake(),
        FakerKind::Address => {
            let street: String = StreetName().fake();
            format!("{} {}", rng.random_range(1..=9999), street)
        }
        FakerKind::City => CityName().fake(),
        FakerKind::Country => CountryName().fake(),
        FakerKind::ZipCode => ZipCode().fake(),
        FakerKind::Company => CompanyName().fake(),
        FakerKind::JobTitle => Title().fake(),
        FakerKind::Ipv4 => IPv4().fake(),
        FakerKind::Ipv6 => IPv6().fake(),
        FakerKind::Mac => MACAddress().fake(),
        FakerKind::UserAgent => UserAgent().fake(),
        FakerKind::Url => {
            let suffix: String = DomainSuffix().fake();
            format!("https://example.{suffix}")
        }
        FakerKind::Domain => {
            let suffix: String = DomainSuffix().fake();
            let word: String = Word().fake();
            format!("{word}.{suffix}")
        }
        FakerKind::Uuid => uuid::Uuid::new_v4().to_string(),
        FakerKind::Word => Word().fake(),
        FakerKind::Sentence => Sentence(4..9).fake(),
        FakerKind::Paragraph => Paragraph(2..4).fake(),
        FakerKind::CreditCard => CreditCardNumber().fake(),
        FakerKind::CurrencyCode => CurrencyCode().fake(),
        FakerKind::Color => COLORS[rng.random_range(0..COLORS.len())].to_string(),
        FakerKind::HexColor => format!("#{:06x}", rng.random_range(0..0x1000000u32)),
        FakerKind::Latitude => format!("{:.6}", rng.random_range(-90.0..90.0f64)),
        FakerKind::Longitude => format!("{:.6}", rng.random_range(-180.0..180.0f64)),
        FakerKind::Boolean => rng.random_bool(0.5).to_string(),
        FakerKind::Digit => rng.random_range(0..10u8).to_string(),
        FakerKind::Month => MONTHS[rng.random_range(0..MONTHS.len())].to_string(),
        FakerKind::Weekday => WEEKDAYS[rng.random_range(0..WEEKDAYS.len())].to_string(),
        FakerKind::Timezone => TimeZone().fake(),
        FakerKind::Semver => format!(
            "{}.{}.{}",
            rng.random_range(0..10u8),
            rng.random_range(0..20u8),
            rng.random_range(0..50u8)
        ),
    }
}

/// Luhn check digit validity, used by the credit-card tests
pub fn luhn_valid(number: &str) -> bool {
    let digits: Vec<u32> = number.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.is_empty() {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_kind_generates_something() {
        let kinds = [
            "name", "firstName", "lastName", "email", "username", "phone", "address", "city",
            "country", "zipCode", "company", "jobTitle", "ipv4", "ipv6", "mac", "userAgent",
            "url", "domain", "uuid", "word", "sentence", "paragraph", "creditCard",
            "currencyCode", "color", "hexColor", "latitude", "longitude", "boolean", "digit",
            "month", "weekday", "timezone", "semver",
        ];
        for name in kinds {
            let kind = FakerKind::parse(name).unwrap_or_else(|| panic!("unknown kind {name}"));
            assert!(!generate(kind).is_empty(), "empty output for {name}");
        }
    }

    #[test]
    fn unknown_kind_is_none() {
        assert_eq!(FakerKind::parse("quux"), None);
    }

    #[test]
    fn credit_cards_pass_luhn() {
        for _ in 0..20 {
            let number = generate(FakerKind::CreditCard);
            assert!(luhn_valid(&number), "failed Luhn: {number}");
        }
    }

    #[test]
    fn hex_color_shape() {
        let color = generate(FakerKind::HexColor);
        assert!(color.starts_with('#') && color.len() == 7);
    }
}
