#[macro_use]
extern crate afl;
use axolotl::Envelope;

fn main() {
    fuzz!(|data: &[u8]| {
        let _ = Envelope::deserialise(data);
    });
}
