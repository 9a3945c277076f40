//! Static region, data center and world tables.

pub struct DataCenter {
    pub name: &'static str,
    pub region: &'static str,
    pub worlds: &'static [&'static str],
}

pub const DATA_CENTERS: &[DataCenter] = &[
    DataCenter {
        name: "Aether",
        region: "North-America",
        worlds: &[
            "Adamantoise",
            "Cactuar",
            "Faerie",
            "Gilgamesh",
            "Jenova",
            "Midgardsormr",
            "Sargatanas",
            "Siren",
        ],
    },
    DataCenter {
        name: "Primal",
        region: "North-America",
        worlds: &[
            "Behemoth",
            "Excalibur",
            "Exodus",
            "Famfrit",
            "Hyperion",
            "Lamia",
            "Leviathan",
            "Ultros",
        ],
    },
    DataCenter {
        name: "Crystal",
        region: "North-America",
        worlds: &[
            "Balmung",
            "Brynhildr",
            "Coeurl",
            "Diabolos",
            "Goblin",
            "Malboro",
            "Mateus",
            "Zalera",
        ],
    },
    DataCenter {
        name: "Dynamis",
        region: "North-America",
        worlds: &[
            "Cuchulainn",
            "Golem",
            "Halicarnassus",
            "Kraken",
            "Maduin",
            "Marilith",
            "Rafflesia",
            "Seraph",
        ],
    },
    DataCenter {
        name: "Chaos",
        region: "Europe",
        worlds: &[
            "Cerberus",
            "Louisoix",
            "Moogle",
            "Omega",
            "Phantom",
            "Ragnarok",
            "Sagittarius",
            "Spriggan",
        ],
    },
    DataCenter {
        name: "Light",
        region: "Europe",
        worlds: &[
            "Alpha",
            "Lich",
            "Odin",
            "Phoenix",
            "Raiden",
            "Shiva",
            "Twintania",
            "Zodiark",
        ],
    },
    DataCenter {
        name: "Materia",
        region: "Oceania",
        worlds: &["Bismarck", "Ravana", "Sephirot", "Sophia", "Zurvan"],
    },
    DataCenter {
        name: "Elemental",
        region: "Japan",
        worlds: &[
            "Aegis",
            "Atomos",
            "Carbuncle",
            "Garuda",
            "Gungnir",
            "Kujata",
            "Tonberry",
            "Typhon",
        ],
    },
    DataCenter {
        name: "Gaia",
        region: "Japan",
        worlds: &[
            "Alexander",
            "Bahamut",
            "Durandal",
            "Fenrir",
            "Ifrit",
            "Ridill",
            "Tiamat",
            "Ultima",
        ],
    },
    DataCenter {
        name: "Mana",
        region: "Japan",
        worlds: &[
            "Anima",
            "Asura",
            "Chocobo",
            "Hades",
            "Ixion",
            "Masamune",
            "Pandaemonium",
            "Titan",
        ],
    },
    DataCenter {
        name: "Meteor",
        region: "Japan",
        worlds: &[
            "Belias",
            "Mandragora",
            "Ramuh",
            "Shinryu",
            "Unicorn",
            "Valefor",
            "Yojimbo",
            "Zeromus",
        ],
    },
];

fn find_data_center(name: &str) -> Option<&'static DataCenter> {
    DATA_CENTERS
        .iter()
        .find(|dc| dc.name.eq_ignore_ascii_case(name))
}

/// Data center a world belongs to.
pub fn data_center_of(world: &str) -> Option<&'static str> {
    DATA_CENTERS
        .iter()
        .find(|dc| dc.worlds.iter().any(|w| w.eq_ignore_ascii_case(world)))
        .map(|dc| dc.name)
}

pub fn worlds_in(data_center: &str) -> &'static [&'static str] {
    find_data_center(data_center).map_or(&[], |dc| dc.worlds)
}

pub fn data_centers_in_region(region: &str) -> Vec<&'static str> {
    DATA_CENTERS
        .iter()
        .filter(|dc| dc.region.eq_ignore_ascii_case(region))
        .map(|dc| dc.name)
        .collect()
}

/// Region of a data center or of a world.
pub fn region_of(market: &str) -> Option<&'static str> {
    find_data_center(market)
        .or_else(|| data_center_of(market).and_then(find_data_center))
        .map(|dc| dc.region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookups() {
        assert_eq!(data_center_of("siren"), Some("Aether"));
        assert_eq!(data_center_of("Nowhere"), None);
        assert_eq!(worlds_in("Materia").len(), 5);
        assert!(worlds_in("Unknown").is_empty());
        assert_eq!(region_of("Light"), Some("Europe"));
        assert_eq!(region_of("Tonberry"), Some("Japan"));
        assert_eq!(
            data_centers_in_region("north-america"),
            vec!["Aether", "Primal", "Crystal", "Dynamis"]
        );
    }

    #[test]
    fn test_world_names_are_unique() {
        let mut all: Vec<_> = DATA_CENTERS.iter().flat_map(|dc| dc.worlds).collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
    }
}
