#![no_main]

use libfuzzer_sys::fuzz_target;

use vmarray::VirtualArray;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }
    // First two bytes pick the capacity, capped at 4096 for speed
    let capacity = usize::from(u16::from_le_bytes([data[0], data[1]])) % 4096;
    let mut array = VirtualArray::<u64>::with_capacity(capacity);
    let mut model = Vec::new();

    for chunk in data[2..].chunks(2) {
        let arg = chunk.get(1).copied().unwrap_or(0);
        match chunk[0] % 4 {
            0 | 1 => {
                let pushed = array.try_push(u64::from(arg)).is_ok();
                assert_eq!(pushed, model.len() < capacity);
                if pushed {
                    model.push(u64::from(arg));
                }
            }
            2 => assert_eq!(array.get(usize::from(arg)), model.get(usize::from(arg))),
            _ => {
                array.reset();
                model.clear();
            }
        }
        assert_eq!(array.as_slice(), model.as_slice());
    }
});
