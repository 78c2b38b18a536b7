//! Delivery zones and the department → province → district directory.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CommerceError;

/// Delivery classification of a destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Zone {
    Metropolitana,
    Urbana,
    Rural,
}

impl Zone {
    pub const ALL: [Zone; 3] = [Zone::Metropolitana, Zone::Urbana, Zone::Rural];

    pub fn as_str(&self) -> &'static str {
        match self {
            Zone::Metropolitana => "metropolitana",
            Zone::Urbana => "urbana",
            Zone::Rural => "rural",
        }
    }
}

impl fmt::Display for Zone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct District {
    pub name: String,
    #[serde(default)]
    pub zone: Option<Zone>,
    #[serde(default)]
    pub postal_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Province {
    pub name: String,
    #[serde(default)]
    pub zone: Option<Zone>,
    #[serde(default)]
    pub postal_code: Option<String>,
    #[serde(default)]
    pub districts: Vec<District>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Department {
    pub name: String,
    #[serde(default)]
    pub zone: Option<Zone>,
    #[serde(default)]
    pub provinces: Vec<Province>,
}

/// Zone and postal code resolved for a district.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedDestination {
    pub zone: Zone,
    pub postal_code: Option<String>,
}

/// Geographic hierarchy used to classify destinations.
///
/// Each level may carry a zone tag and a postal code; the most specific level
/// that sets one wins. Names match case- and accent-insensitively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AddressDirectory {
    #[serde(default)]
    pub departments: Vec<Department>,
    /// Zone used when no level of the hierarchy is tagged.
    #[serde(default = "default_zone")]
    pub default_zone: Zone,
}

fn default_zone() -> Zone {
    Zone::Rural
}

impl Default for AddressDirectory {
    fn default() -> Self {
        Self::peru()
    }
}

impl AddressDirectory {
    pub fn new(departments: Vec<Department>) -> Self {
        Self {
            departments,
            default_zone: default_zone(),
        }
    }

    /// Resolve a district to its zone and postal code.
    pub fn resolve(
        &self,
        department: &str,
        province: &str,
        district: &str,
    ) -> Result<ResolvedDestination, CommerceError> {
        let unknown = || CommerceError::UnknownDistrict(format!("{district}, {province}, {department}"));

        let dep = self
            .departments
            .iter()
            .find(|d| same_name(&d.name, department))
            .ok_or_else(unknown)?;
        let prov = dep
            .provinces
            .iter()
            .find(|p| same_name(&p.name, province))
            .ok_or_else(unknown)?;
        let dist = prov
            .districts
            .iter()
            .find(|d| same_name(&d.name, district))
            .ok_or_else(unknown)?;

        let zone = dist
            .zone
            .or(prov.zone)
            .or(dep.zone)
            .unwrap_or(self.default_zone);
        let postal_code = dist
            .postal_code
            .clone()
            .or_else(|| prov.postal_code.clone());

        Ok(ResolvedDestination { zone, postal_code })
    }

    pub fn department_names(&self) -> Vec<&str> {
        self.departments.iter().map(|d| d.name.as_str()).collect()
    }

    pub fn province_names(&self, department: &str) -> Vec<&str> {
        self.departments
            .iter()
            .filter(|d| same_name(&d.name, department))
            .flat_map(|d| d.provinces.iter().map(|p| p.name.as_str()))
            .collect()
    }

    pub fn district_names(&self, department: &str, province: &str) -> Vec<&str> {
        self.departments
            .iter()
            .filter(|d| same_name(&d.name, department))
            .flat_map(|d| d.provinces.iter())
            .filter(|p| same_name(&p.name, province))
            .flat_map(|p| p.districts.iter().map(|d| d.name.as_str()))
            .collect()
    }

    /// Built-in directory covering the main delivery areas.
    pub fn peru() -> Self {
        fn district(name: &str, postal_code: &str) -> District {
            District {
                name: name.to_string(),
                zone: None,
                postal_code: Some(postal_code.to_string()),
            }
        }
        fn province(name: &str, zone: Option<Zone>, districts: Vec<District>) -> Province {
            Province {
                name: name.to_string(),
                zone,
                postal_code: None,
                districts,
            }
        }
        fn department(name: &str, zone: Option<Zone>, provinces: Vec<Province>) -> Department {
            Department {
                name: name.to_string(),
                zone,
                provinces,
            }
        }

        Self::new(vec![
            department(
                "Lima",
                Some(Zone::Rural),
                vec![
                    province(
                        "Lima",
                        Some(Zone::Metropolitana),
                        vec![
                            district("Cercado de Lima", "15001"),
                            district("Miraflores", "15074"),
                            district("San Isidro", "15073"),
                            district("Santiago de Surco", "15023"),
                            district("Barranco", "15063"),
                            district("La Molina", "15024"),
                            district("San Borja", "15036"),
                            district("Jesús María", "15072"),
                            district("Lince", "15046"),
                            district("Los Olivos", "15301"),
                        ],
                    ),
                    province(
                        "Huaral",
                        None,
                        vec![district("Huaral", "15201"), district("Chancay", "15131")],
                    ),
                    province(
                        "Cañete",
                        None,
                        vec![district("San Vicente de Cañete", "15701")],
                    ),
                ],
            ),
            department(
                "Callao",
                Some(Zone::Metropolitana),
                vec![province(
                    "Callao",
                    None,
                    vec![
                        district("Callao", "07001"),
                        district("Bellavista", "07011"),
                        district("La Perla", "07016"),
                    ],
                )],
            ),
            department(
                "Arequipa",
                Some(Zone::Rural),
                vec![
                    province(
                        "Arequipa",
                        Some(Zone::Urbana),
                        vec![
                            district("Arequipa", "04001"),
                            district("Cayma", "04006"),
                            district("Yanahuara", "04017"),
                        ],
                    ),
                    province("Caylloma", None, vec![district("Chivay", "04150")]),
                ],
            ),
            department(
                "Cusco",
                Some(Zone::Rural),
                vec![
                    province(
                        "Cusco",
                        Some(Zone::Urbana),
                        vec![
                            district("Cusco", "08001"),
                            district("Wanchaq", "08002"),
                            district("San Sebastián", "08005"),
                        ],
                    ),
                    province("La Convención", None, vec![district("Santa Ana", "08650")]),
                ],
            ),
            department(
                "La Libertad",
                Some(Zone::Rural),
                vec![province(
                    "Trujillo",
                    Some(Zone::Urbana),
                    vec![
                        district("Trujillo", "13001"),
                        district("Víctor Larco Herrera", "13009"),
                    ],
                )],
            ),
            department(
                "Piura",
                Some(Zone::Rural),
                vec![province(
                    "Piura",
                    Some(Zone::Urbana),
                    vec![district("Piura", "20001"), district("Castilla", "20003")],
                )],
            ),
        ])
    }
}

/// Lowercase, trim and strip Spanish diacritics.
pub(crate) fn fold_name(name: &str) -> String {
    name.trim()
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'á' | 'à' => 'a',
            'é' | 'è' => 'e',
            'í' | 'ì' => 'i',
            'ó' | 'ò' => 'o',
            'ú' | 'ù' | 'ü' => 'u',
            'ñ' => 'n',
            other => other,
        })
        .collect()
}

fn same_name(a: &str, b: &str) -> bool {
    fold_name(a) == fold_name(b)
}
