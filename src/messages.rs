/*
Copyright (c) 2020 Todd Stellanova
LICENSE: BSD3 (see LICENSE file)
*/

//used for converting byte slices to fields
use byteorder::{ByteOrder, LittleEndian};

pub const UBX_CLASS_NAV: u8 = 0x01;
pub const UBX_CLASS_ACK: u8 = 0x05;
pub const UBX_CLASS_CFG: u8 = 0x06;

pub const UBX_ID_NAV_PVT: u8 = 0x07;
pub const UBX_ID_ACK_NAK: u8 = 0x00;
pub const UBX_ID_ACK_ACK: u8 = 0x01;
pub const UBX_ID_CFG_PRT: u8 = 0x00;
pub const UBX_ID_CFG_MSG: u8 = 0x01;
pub const UBX_ID_CFG_RATE: u8 = 0x08;

/// Protocol mask bits used in CFG-PRT in/out masks
pub const PROTO_MASK_UBX: u16 = 0x0001;
pub const PROTO_MASK_NMEA: u16 = 0x0002;

/// CFG-RATE time reference value for UTC
pub const TIME_REF_UTC: u16 = 0;

/// A raw UBX message: class, id and payload, without framing
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    pub class: u8,
    pub id: u8,
    pub payload: Vec<u8>,
}

impl Packet {
    pub fn new(class: u8, id: u8, payload: Vec<u8>) -> Self {
        Self { class, id, payload }
    }

    /// A poll request is a message with the queried class/id and no payload
    pub fn poll(class: u8, id: u8) -> Self {
        Self::new(class, id, Vec::new())
    }
}

/// Messages recognized by this driver, decoded from a `Packet`
#[derive(Clone, Debug, PartialEq)]
pub enum Message {
    /// UBX-ACK-ACK: the receiver accepted the message with this class/id
    Ack { class: u8, id: u8 },
    /// UBX-ACK-NAK: the receiver rejected the message with this class/id
    Nack { class: u8, id: u8 },
    /// UBX-CFG-PRT response for a UART port
    PortConfig(PortConfig),
    /// UBX-CFG-MSG response
    MessageRate(MessageRate),
    /// UBX-CFG-RATE response
    MeasurementRate(MeasurementRate),
    /// UBX-NAV-PVT report
    NavPvt(NavPosVelTimeM8),
    /// Well-formed frame with a class/id pair we don't interpret
    Unhandled(Packet),
}

impl Message {
    /// Interpret a packet according to its class/id pair.
    /// Packets whose payload doesn't fit the expected layout are returned
    /// as `Unhandled`.
    pub fn from_packet(packet: Packet) -> Self {
        let parsed = match (packet.class, packet.id) {
            (UBX_CLASS_ACK, UBX_ID_ACK_ACK) if packet.payload.len() >= 2 => {
                Some(Message::Ack {
                    class: packet.payload[0],
                    id: packet.payload[1],
                })
            }
            (UBX_CLASS_ACK, UBX_ID_ACK_NAK) if packet.payload.len() >= 2 => {
                Some(Message::Nack {
                    class: packet.payload[0],
                    id: packet.payload[1],
                })
            }
            (UBX_CLASS_CFG, UBX_ID_CFG_PRT) => {
                PortConfig::from_payload(&packet.payload).map(Message::PortConfig)
            }
            (UBX_CLASS_CFG, UBX_ID_CFG_MSG) => {
                MessageRate::from_payload(&packet.payload).map(Message::MessageRate)
            }
            (UBX_CLASS_CFG, UBX_ID_CFG_RATE) => {
                MeasurementRate::from_payload(&packet.payload)
                    .map(Message::MeasurementRate)
            }
            (UBX_CLASS_NAV, UBX_ID_NAV_PVT) => {
                NavPosVelTimeM8::from_payload(&packet.payload).map(Message::NavPvt)
            }
            _ => None,
        };
        parsed.unwrap_or(Message::Unhandled(packet))
    }
}

/// Support UBX-CFG-PRT message, UART port layout
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortConfig {
    /// Port identifier (1 or 2 for UART)
    pub port_id: u8,
    /// TX ready PIN configuration
    pub tx_ready: u16,
    /// UART mode (character length, parity, stop bits)
    pub mode: u32,
    /// Baud rate in bits/second
    pub baud_rate: u32,
    /// Input protocols enabled on this port
    pub in_proto_mask: u16,
    /// Output protocols enabled on this port
    pub out_proto_mask: u16,
    /// Flags bit mask
    pub flags: u16,
}

impl PortConfig {
    pub const PAYLOAD_LEN: usize = 20;

    pub fn from_payload(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::PAYLOAD_LEN {
            return None;
        }
        Some(Self {
            port_id: buf[0],
            tx_ready: LittleEndian::read_u16(&buf[2..4]),
            mode: LittleEndian::read_u32(&buf[4..8]),
            baud_rate: LittleEndian::read_u32(&buf[8..12]),
            in_proto_mask: LittleEndian::read_u16(&buf[12..14]),
            out_proto_mask: LittleEndian::read_u16(&buf[14..16]),
            flags: LittleEndian::read_u16(&buf[16..18]),
        })
    }

    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::PAYLOAD_LEN];
        buf[0] = self.port_id;
        LittleEndian::write_u16(&mut buf[2..4], self.tx_ready);
        LittleEndian::write_u32(&mut buf[4..8], self.mode);
        LittleEndian::write_u32(&mut buf[8..12], self.baud_rate);
        LittleEndian::write_u16(&mut buf[12..14], self.in_proto_mask);
        LittleEndian::write_u16(&mut buf[14..16], self.out_proto_mask);
        LittleEndian::write_u16(&mut buf[16..18], self.flags);
        buf
    }

    /// Derive the configuration we want from the one the receiver reported:
    /// NMEA input off, UBX on in both directions, fixed baud rate.
    /// Port id, tx-ready, mode and flags are kept as reported.
    pub fn ubx_only(&self, baud_rate: u32) -> Self {
        Self {
            baud_rate,
            in_proto_mask: (self.in_proto_mask | PROTO_MASK_UBX) & !PROTO_MASK_NMEA,
            out_proto_mask: self.out_proto_mask | PROTO_MASK_UBX,
            ..*self
        }
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(UBX_CLASS_CFG, UBX_ID_CFG_PRT, self.to_payload())
    }
}

impl Default for PortConfig {
    /// UART1, 8N1, as shipped from the factory
    fn default() -> Self {
        Self {
            port_id: 1,
            tx_ready: 0,
            mode: 0x0000_08D0,
            baud_rate: 9600,
            in_proto_mask: PROTO_MASK_UBX | PROTO_MASK_NMEA,
            out_proto_mask: PROTO_MASK_UBX | PROTO_MASK_NMEA,
            flags: 0,
        }
    }
}

/// Support UBX-CFG-MSG message
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MessageRate {
    pub msg_class: u8,
    pub msg_id: u8,
    /// Output rate per port, indexed by port id (0 = I2C, 1 = UART1, ...).
    /// A 3-byte response only carries the rate of the current port,
    /// which is stored at every index.
    pub rates: [u8; 6],
}

impl MessageRate {
    pub fn from_payload(buf: &[u8]) -> Option<Self> {
        match buf.len() {
            3 => Some(Self {
                msg_class: buf[0],
                msg_id: buf[1],
                rates: [buf[2]; 6],
            }),
            8 => {
                let mut rates = [0u8; 6];
                rates.copy_from_slice(&buf[2..8]);
                Some(Self {
                    msg_class: buf[0],
                    msg_id: buf[1],
                    rates,
                })
            }
            _ => None,
        }
    }

    /// Output rate on the given port
    pub fn rate_on_port(&self, port_id: u8) -> u8 {
        self.rates
            .get(port_id as usize)
            .copied()
            .unwrap_or(self.rates[1])
    }

    /// Poll the output rate of a message
    pub fn poll_packet(msg_class: u8, msg_id: u8) -> Packet {
        Packet::new(UBX_CLASS_CFG, UBX_ID_CFG_MSG, vec![msg_class, msg_id])
    }

    /// Set the output rate of a message on the current port
    pub fn set_packet(msg_class: u8, msg_id: u8, rate: u8) -> Packet {
        Packet::new(UBX_CLASS_CFG, UBX_ID_CFG_MSG, vec![msg_class, msg_id, rate])
    }
}

/// Support UBX-CFG-RATE message
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MeasurementRate {
    /// Interval between measurements (ms)
    pub meas_rate_ms: u16,
    /// Number of measurement cycles per navigation solution
    pub nav_rate: u16,
    /// Time system to which measurements are aligned (0 = UTC)
    pub time_ref: u16,
}

impl MeasurementRate {
    pub const PAYLOAD_LEN: usize = 6;

    pub fn from_payload(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::PAYLOAD_LEN {
            return None;
        }
        Some(Self {
            meas_rate_ms: LittleEndian::read_u16(&buf[0..2]),
            nav_rate: LittleEndian::read_u16(&buf[2..4]),
            time_ref: LittleEndian::read_u16(&buf[4..6]),
        })
    }

    pub fn to_packet(&self) -> Packet {
        let mut buf = vec![0u8; Self::PAYLOAD_LEN];
        LittleEndian::write_u16(&mut buf[0..2], self.meas_rate_ms);
        LittleEndian::write_u16(&mut buf[2..4], self.nav_rate);
        LittleEndian::write_u16(&mut buf[4..6], self.time_ref);
        Packet::new(UBX_CLASS_CFG, UBX_ID_CFG_RATE, buf)
    }
}

/// Support UBX-NAV-PVT message
/// Navigation Position Velocity Time Solution
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct NavPosVelTimeM8 {
    /// GPS time of week of the navigation epoch. (ms)
    pub itow: u32,
    /// Year (UTC)
    pub year: u16,
    /// Month, range 1..12 (UTC)
    pub month: u8,
    /// Day of month, range 1..31 (UTC)
    pub day: u8,
    /// Hour of day, range 0..23 (UTC)
    pub hour: u8,
    /// Minute of hour, range 0..59 (UTC)
    pub min: u8,
    /// Seconds of minute, range 0..60 (UTC)
    pub sec: u8,
    /// Validity flags
    pub validity_flags: u8,
    /// Time accuracy estimate (ns UTC)
    pub time_accuracy: u32,
    /// Fraction of second, range -1e9 .. 1e9 (ns UTC)
    pub nanosecond: i32,
    /// GNSS fix type:
    /// 0 no fix, 1: dead reckoning only, 2: 2D-fix, 3: 3D-fix,
    /// 4: GNSS + dead reckoning combined 5: time only fix
    pub fix_type: u8,
    /// Fix status flags
    pub flags: u8,
    /// Additional flags
    pub flags2: u8,
    /// Number of satellites used in Nav Solution
    pub num_satellites: u8,
    /// Longitude (1e-7 degrees)
    pub lon: i32,
    /// Latitude (1e-7 degrees)
    pub lat: i32,
    /// Height above ellipsoid (mm)
    pub height: i32,
    /// Height above mean sea level (AMSL, mm)
    pub height_msl: i32,
    /// Horizontal accuracy estimate (mm)
    pub h_accuracy: u32,
    /// Vertical accuracy estimate (mm)
    pub v_accuracy: u32,
    /// NED north velocity (mm/s)
    pub vel_north: i32,
    /// NED east velocity (mm/s)
    pub vel_east: i32,
    /// NED down velocity (mm/s)
    pub vel_down: i32,
    /// Ground Speed  (mm/s)
    pub ground_speed: i32,
    /// 2D Heading of motion (1e-5 degrees)
    pub heading_motion: i32,
    /// Speed accuracy estimate (mm/s)
    pub speed_accuracy: u32,
    /// Heading accuracy estimate for both motion and vehicle (degrees)
    pub heading_accuracy: u32,
    /// Position Dilution of Precision
    pub pos_dop: u16,
    pub flags3: u8,
    /// Heading of vehicle (1e-5 degrees)
    pub heading_vehicle: i32,
    /// Magnetic declination (1e-2 degrees)
    pub mag_dec: i16,
    /// Magnetic declination accuracy (1e-2 degrees)
    pub mag_accuracy: u16,
}

impl NavPosVelTimeM8 {
    pub const PAYLOAD_LEN: usize = 92;

    /// Read a NavPosVelTimeM8 from a payload slice
    pub fn from_payload(buf: &[u8]) -> Option<Self> {
        if buf.len() < Self::PAYLOAD_LEN {
            return None;
        }
        Some(Self {
            itow: LittleEndian::read_u32(&buf[0..4]),
            year: LittleEndian::read_u16(&buf[4..6]),
            month: buf[6],
            day: buf[7],
            hour: buf[8],
            min: buf[9],
            sec: buf[10],
            validity_flags: buf[11],
            time_accuracy: LittleEndian::read_u32(&buf[12..16]),
            nanosecond: LittleEndian::read_i32(&buf[16..20]),
            fix_type: buf[20],
            flags: buf[21],
            flags2: buf[22],
            num_satellites: buf[23],
            lon: LittleEndian::read_i32(&buf[24..28]),
            lat: LittleEndian::read_i32(&buf[28..32]),
            height: LittleEndian::read_i32(&buf[32..36]),
            height_msl: LittleEndian::read_i32(&buf[36..40]),
            h_accuracy: LittleEndian::read_u32(&buf[40..44]),
            v_accuracy: LittleEndian::read_u32(&buf[44..48]),
            vel_north: LittleEndian::read_i32(&buf[48..52]),
            vel_east: LittleEndian::read_i32(&buf[52..56]),
            vel_down: LittleEndian::read_i32(&buf[56..60]),
            ground_speed: LittleEndian::read_i32(&buf[60..64]),
            heading_motion: LittleEndian::read_i32(&buf[64..68]),
            speed_accuracy: LittleEndian::read_u32(&buf[68..72]),
            heading_accuracy: LittleEndian::read_u32(&buf[72..76]),
            pos_dop: LittleEndian::read_u16(&buf[76..78]),
            flags3: buf[78],
            heading_vehicle: LittleEndian::read_i32(&buf[84..88]),
            mag_dec: LittleEndian::read_i16(&buf[88..90]),
            mag_accuracy: LittleEndian::read_u16(&buf[90..92]),
        })
    }

    /// Serialize into a payload; the receiver never accepts this as input,
    /// it exists for simulation and tests.
    pub fn to_payload(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::PAYLOAD_LEN];
        LittleEndian::write_u32(&mut buf[0..4], self.itow);
        LittleEndian::write_u16(&mut buf[4..6], self.year);
        buf[6] = self.month;
        buf[7] = self.day;
        buf[8] = self.hour;
        buf[9] = self.min;
        buf[10] = self.sec;
        buf[11] = self.validity_flags;
        LittleEndian::write_u32(&mut buf[12..16], self.time_accuracy);
        LittleEndian::write_i32(&mut buf[16..20], self.nanosecond);
        buf[20] = self.fix_type;
        buf[21] = self.flags;
        buf[22] = self.flags2;
        buf[23] = self.num_satellites;
        LittleEndian::write_i32(&mut buf[24..28], self.lon);
        LittleEndian::write_i32(&mut buf[28..32], self.lat);
        LittleEndian::write_i32(&mut buf[32..36], self.height);
        LittleEndian::write_i32(&mut buf[36..40], self.height_msl);
        LittleEndian::write_u32(&mut buf[40..44], self.h_accuracy);
        LittleEndian::write_u32(&mut buf[44..48], self.v_accuracy);
        LittleEndian::write_i32(&mut buf[48..52], self.vel_north);
        LittleEndian::write_i32(&mut buf[52..56], self.vel_east);
        LittleEndian::write_i32(&mut buf[56..60], self.vel_down);
        LittleEndian::write_i32(&mut buf[60..64], self.ground_speed);
        LittleEndian::write_i32(&mut buf[64..68], self.heading_motion);
        LittleEndian::write_u32(&mut buf[68..72], self.speed_accuracy);
        LittleEndian::write_u32(&mut buf[72..76], self.heading_accuracy);
        LittleEndian::write_u16(&mut buf[76..78], self.pos_dop);
        buf[78] = self.flags3;
        LittleEndian::write_i32(&mut buf[84..88], self.heading_vehicle);
        LittleEndian::write_i16(&mut buf[88..90], self.mag_dec);
        LittleEndian::write_u16(&mut buf[90..92], self.mag_accuracy);
        buf
    }

    pub fn to_packet(&self) -> Packet {
        Packet::new(UBX_CLASS_NAV, UBX_ID_NAV_PVT, self.to_payload())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ack_names_the_acknowledged_message() {
        let pkt = Packet::new(UBX_CLASS_ACK, UBX_ID_ACK_ACK, vec![0x06, 0x00]);
        assert_eq!(
            Message::from_packet(pkt),
            Message::Ack {
                class: UBX_CLASS_CFG,
                id: UBX_ID_CFG_PRT
            }
        );
        let pkt = Packet::new(UBX_CLASS_ACK, UBX_ID_ACK_NAK, vec![0x06, 0x08]);
        assert_eq!(
            Message::from_packet(pkt),
            Message::Nack {
                class: UBX_CLASS_CFG,
                id: UBX_ID_CFG_RATE
            }
        );
    }

    #[test]
    fn short_payload_is_unhandled() {
        let pkt = Packet::new(UBX_CLASS_NAV, UBX_ID_NAV_PVT, vec![0u8; 40]);
        assert!(matches!(Message::from_packet(pkt), Message::Unhandled(_)));
    }

    #[test]
    fn port_config_layout() {
        let mut payload = [0u8; 20];
        payload[0] = 1;
        payload[4..8].copy_from_slice(&0x08D0u32.to_le_bytes());
        payload[8..12].copy_from_slice(&9600u32.to_le_bytes());
        payload[12..14].copy_from_slice(&0x0007u16.to_le_bytes());
        payload[14..16].copy_from_slice(&0x0003u16.to_le_bytes());
        let cfg = PortConfig::from_payload(&payload).unwrap();
        assert_eq!(cfg.port_id, 1);
        assert_eq!(cfg.mode, 0x08D0);
        assert_eq!(cfg.baud_rate, 9600);

        let wanted = cfg.ubx_only(115_200);
        assert_eq!(wanted.baud_rate, 115_200);
        assert_eq!(wanted.in_proto_mask, 0x0005);
        assert_eq!(wanted.out_proto_mask, 0x0003);
        assert_eq!(wanted.mode, cfg.mode);
        assert_eq!(&wanted.to_payload()[8..12], &115_200u32.to_le_bytes());
    }

    #[test]
    fn message_rate_short_and_long_forms() {
        let short = MessageRate::from_payload(&[0x01, 0x07, 5]).unwrap();
        assert_eq!(short.rate_on_port(1), 5);
        let long =
            MessageRate::from_payload(&[0x01, 0x07, 0, 2, 0, 3, 0, 0]).unwrap();
        assert_eq!(long.rate_on_port(1), 2);
        assert_eq!(long.rate_on_port(3), 3);
        assert!(MessageRate::from_payload(&[0x01, 0x07]).is_none());
    }

    #[test]
    fn nav_pvt_fields_at_their_offsets() {
        let pvt = NavPosVelTimeM8 {
            year: 2021,
            month: 6,
            day: 30,
            fix_type: 3,
            num_satellites: 9,
            lon: -1_234_567,
            lat: 515_000_000,
            ground_speed: 2500,
            mag_dec: -12,
            ..Default::default()
        };
        let payload = pvt.to_payload();
        assert_eq!(payload.len(), NavPosVelTimeM8::PAYLOAD_LEN);
        assert_eq!(payload[23], 9);
        assert_eq!(&payload[60..64], &2500i32.to_le_bytes());
        assert_eq!(NavPosVelTimeM8::from_payload(&payload), Some(pvt));
    }
}
