#[macro_use]
extern crate afl;
use axolotl::{Envelope, IdentityKeyPair, MemoryPreKeyStore, PreKeyBundle, Session};

fn get_session() -> (Session, MemoryPreKeyStore) {
    // The Victim
    let alice = IdentityKeyPair::new().expect("Setup failed");

    // The Attacker context
    let bob = IdentityKeyPair::new().expect("Setup failed");
    let store = MemoryPreKeyStore::new(1).expect("Setup failed");
    let bundle = PreKeyBundle::signed(&bob, store.get(0).expect("Setup failed"));

    let session = Session::init_from_prekey(&alice, &bundle, None).expect("Setup failed");
    (session, store)
}

fn main() {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .build()
        .expect("Runtime setup failed");
    let (mut session, mut store) = get_session();

    fuzz!(|data: &[u8]| {
        if let Ok(envelope) = Envelope::deserialise(data) {
            let _ = runtime.block_on(session.decrypt(&mut store, &envelope));
        }
    });
}
