//! Anneau borné de paquets TS horodatés
//!
//! Stockage contigu de `capacity × 188` octets plus un horodatage
//! d'entrée par slot. `head` désigne le plus ancien paquet, `tail` le
//! prochain slot libre, modulo la capacité. La politique de
//! débordement appartient à l'appelant (les stages jettent le plus
//! ancien).

use pmompegts::{TS_PACKET_SIZE, TsPacket};

pub struct PacketRing {
    storage: Vec<u8>,
    timestamps: Vec<u64>,
    capacity: usize,
    head: usize,
    tail: usize,
    count: usize,
}

impl PacketRing {
    /// Crée un anneau de `capacity` slots (au moins 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            storage: vec![0u8; capacity * TS_PACKET_SIZE],
            timestamps: vec![0u64; capacity],
            capacity,
            head: 0,
            tail: 0,
            count: 0,
        }
    }

    /// Copie `packet` en queue avec son horodatage d'entrée.
    /// Retourne `false` si l'anneau est plein (rien n'est écrit).
    pub fn push(&mut self, packet: &TsPacket, ts_us: u64) -> bool {
        if self.count == self.capacity {
            return false;
        }
        let offset = self.tail * TS_PACKET_SIZE;
        self.storage[offset..offset + TS_PACKET_SIZE].copy_from_slice(packet);
        self.timestamps[self.tail] = ts_us;
        self.tail = (self.tail + 1) % self.capacity;
        self.count += 1;
        true
    }

    /// Retire et retourne le plus ancien paquet et son horodatage.
    pub fn pop_front(&mut self) -> Option<(TsPacket, u64)> {
        if self.count == 0 {
            return None;
        }
        let offset = self.head * TS_PACKET_SIZE;
        let mut packet = [0u8; TS_PACKET_SIZE];
        packet.copy_from_slice(&self.storage[offset..offset + TS_PACKET_SIZE]);
        let ts = self.timestamps[self.head];
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
        Some((packet, ts))
    }

    /// Jette le plus ancien paquet sans le copier.
    pub fn drop_front(&mut self) -> bool {
        if self.count == 0 {
            return false;
        }
        self.head = (self.head + 1) % self.capacity;
        self.count -= 1;
        true
    }

    /// Horodatage d'entrée du plus ancien paquet.
    pub fn front_timestamp(&self) -> Option<u64> {
        if self.count == 0 {
            None
        } else {
            Some(self.timestamps[self.head])
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_full(&self) -> bool {
        self.count == self.capacity
    }

    /// Octets actuellement tamponnés.
    pub fn bytes(&self) -> u64 {
        (self.count * TS_PACKET_SIZE) as u64
    }
}
