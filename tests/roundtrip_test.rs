//! Round-trip laws checked with generated inputs.

use std::io::Cursor;

use proptest::prelude::*;

use coral::core::config::Config;
use coral::notify::NotifyClass;
use coral::rdb::{load_object, save_object, RioReader, RioWriter};
use coral::value::{strconv, Object};

static MASK_ALPHABET: [char; 15] = [
    'A', 'g', '$', 'l', 's', 'h', 'z', 'x', 'e', 'K', 'E', 't', 'm', 'd', 'n',
];

proptest! {
    #[test]
    fn prop_class_mask_parse_serialize_round_trip(
        chars in proptest::collection::vec(
            proptest::sample::select(&MASK_ALPHABET[..]),
            0..20,
        )
    ) {
        let text: String = chars.into_iter().collect();
        let mask = NotifyClass::parse(&text).expect("alphabet characters always parse");
        let rendered = mask.to_string();
        prop_assert_eq!(NotifyClass::parse(&rendered).unwrap(), mask);
    }

    #[test]
    fn prop_mask_rejects_bytes_outside_alphabet(c in any::<char>()) {
        prop_assume!(!"Ag$lshzxeKEtmdn".contains(c));
        prop_assert!(NotifyClass::parse(&c.to_string()).is_err());
    }

    #[test]
    fn prop_integer_strings_survive_decode(v in any::<i64>()) {
        let rendered = strconv::format_i64(v);
        prop_assert_eq!(strconv::parse_i64(&rendered), Some(v));

        let object = Object::create_string_try_int(&rendered);
        prop_assert_eq!(object.encoding().name(), "int");
        let object_bytes = object.string_bytes();
        prop_assert_eq!(object_bytes.as_ref(), rendered.as_slice());
    }

    #[test]
    fn prop_string_dump_round_trip(bytes in proptest::collection::vec(any::<u8>(), 0..200)) {
        let config = Config::default();
        let original = std::sync::Arc::new(Object::create_string_try_int(&bytes));

        let mut writer = RioWriter::new(Vec::new());
        save_object(&mut writer, &original).unwrap();
        let dumped = writer.into_inner();

        let mut reader = RioReader::new(Cursor::new(dumped));
        let loaded = load_object(&mut reader, &config).unwrap();

        let loaded_bytes = loaded.string_bytes();
        let original_bytes = original.string_bytes();
        prop_assert_eq!(loaded_bytes.as_ref(), original_bytes.as_ref());
        prop_assert_eq!(loaded.encoding(), original.encoding());
    }
}
